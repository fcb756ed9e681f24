use std::time::Duration;

use crate::config::ScannerConfig;
use crate::domain::{EpisodeId, EpisodeMetadata, IdentifierError, WorkId};

/// Position of a scan over the identifiers of one work.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCursor {
    pub work_id: WorkId,
    /// Last identifier known to be published, used to harvest fresh tokens
    pub previous: EpisodeId,
    /// Identifier probed by the next attempt
    pub current: EpisodeId,
    pub attempt: u32,
    pub auth_token: Option<String>,
    /// Most recent hit of this run
    pub last_hit: Option<Hit>,
}

impl ScanCursor {
    /// Probe `seed` itself first.
    pub fn starting_at(work_id: WorkId, seed: EpisodeId) -> Self {
        Self {
            work_id,
            previous: seed.clone(),
            current: seed,
            attempt: 0,
            auth_token: None,
            last_hit: None,
        }
    }

    /// Probe the identifier after `known`, a published episode.
    pub fn following(work_id: WorkId, known: EpisodeId) -> Result<Self, IdentifierError> {
        let current = known.next()?;
        Ok(Self {
            work_id,
            previous: known,
            current,
            attempt: 0,
            auth_token: None,
            last_hit: None,
        })
    }

    pub fn with_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token;
        self
    }

    fn advance(&mut self) -> Result<(), IdentifierError> {
        let next = self.current.next()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }
}

/// An identifier found published during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub episode: EpisodeId,
    /// Present when the probe went through the metadata endpoint
    pub metadata: Option<EpisodeMetadata>,
}

/// When a hit ends the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRule {
    /// The first published identifier is the result.
    FirstHit,
    /// Keep walking over hits; the first miss after a hit makes the
    /// previous identifier the result.
    GapAfterHit,
}

/// What a miss does to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissRule {
    /// Move on to the next identifier.
    Advance,
    /// Keep probing the same identifier until it appears.
    Hold,
}

/// Classified result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Available(Option<EpisodeMetadata>),
    Missing,
    Forbidden,
    Unexpected(String),
}

/// Action the driver takes after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Sleep, then probe `cursor.current`.
    Wait(Duration),
    /// Re-probe `cursor.previous` for a fresh token, then retry.
    RefreshToken,
    /// Report the anomaly, sleep, then retry the same identifier.
    Backoff { delay: Duration, reason: String },
    Finish(ScanEnd),
}

/// Result of applying one outcome to a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub cursor: ScanCursor,
    /// Set when this attempt found a published identifier that does not
    /// end the scan
    pub discovered: Option<Hit>,
    pub step: Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Searching,
    Found,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEnd {
    Found {
        episode: EpisodeId,
        metadata: Option<EpisodeMetadata>,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_hit: Option<Hit>,
    },
    Cancelled {
        attempts: u32,
        last_hit: Option<Hit>,
    },
}

impl ScanEnd {
    pub fn state(&self) -> ScanState {
        match self {
            ScanEnd::Found { .. } => ScanState::Found,
            ScanEnd::Exhausted { .. } => ScanState::Exhausted,
            ScanEnd::Cancelled { .. } => ScanState::Cancelled,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ScanEnd::Found { attempts, .. }
            | ScanEnd::Exhausted { attempts, .. }
            | ScanEnd::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// How a scan reacts to probe outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPolicy {
    pub stop: StopRule,
    pub on_miss: MissRule,
    pub max_attempts: u32,
    pub interval: Duration,
    pub error_backoff: Duration,
    /// Log every miss at info level instead of debug
    pub log_misses: bool,
}

impl ScanPolicy {
    /// Wait for one awaited identifier to be published.
    pub fn next_episode(config: &ScannerConfig) -> Self {
        Self {
            stop: StopRule::FirstHit,
            on_miss: MissRule::Hold,
            max_attempts: config.max_attempts.max(1),
            interval: config.poll_interval,
            error_backoff: config.error_backoff(),
            log_misses: config.log_misses,
        }
    }

    /// Walk forward until any identifier is published.
    pub fn first_episode(config: &ScannerConfig) -> Self {
        Self {
            stop: StopRule::FirstHit,
            on_miss: MissRule::Advance,
            max_attempts: config.catch_up_max_attempts.max(1),
            interval: config.catch_up_interval(),
            error_backoff: config.error_backoff(),
            log_misses: false,
        }
    }

    /// Walk over the published backlog to the newest identifier.
    pub fn backlog(config: &ScannerConfig) -> Self {
        Self {
            stop: StopRule::GapAfterHit,
            on_miss: MissRule::Advance,
            max_attempts: config.catch_up_max_attempts.max(1),
            interval: config.catch_up_interval(),
            error_backoff: config.error_backoff(),
            log_misses: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Apply the outcome of probing `cursor.current`.
    ///
    /// Every call counts one attempt. Codec errors are returned as-is and
    /// end the scan.
    pub fn transition(
        &self,
        mut cursor: ScanCursor,
        outcome: ProbeOutcome,
    ) -> Result<Transition, IdentifierError> {
        cursor.attempt += 1;
        let mut discovered = None;

        let step = match outcome {
            ProbeOutcome::Available(metadata) => match self.stop {
                StopRule::FirstHit => Step::Finish(ScanEnd::Found {
                    episode: cursor.current.clone(),
                    metadata,
                    attempts: cursor.attempt,
                }),
                StopRule::GapAfterHit => {
                    let hit = Hit {
                        episode: cursor.current.clone(),
                        metadata,
                    };
                    cursor.last_hit = Some(hit.clone());
                    discovered = Some(hit.clone());
                    match cursor.advance() {
                        Ok(()) => Step::Wait(self.interval),
                        // Nothing can follow the last identifier of a work
                        Err(IdentifierError::SequenceOverflow(_)) => Step::Finish(ScanEnd::Found {
                            episode: hit.episode,
                            metadata: hit.metadata,
                            attempts: cursor.attempt,
                        }),
                        Err(e) => return Err(e),
                    }
                }
            },
            ProbeOutcome::Missing => match (self.stop, &cursor.last_hit) {
                (StopRule::GapAfterHit, Some(hit)) => Step::Finish(ScanEnd::Found {
                    episode: hit.episode.clone(),
                    metadata: hit.metadata.clone(),
                    attempts: cursor.attempt,
                }),
                _ => {
                    if self.on_miss == MissRule::Advance {
                        cursor.advance()?;
                    }
                    Step::Wait(self.interval)
                }
            },
            ProbeOutcome::Forbidden => Step::RefreshToken,
            ProbeOutcome::Unexpected(reason) => Step::Backoff {
                delay: self.error_backoff,
                reason,
            },
        };

        let step = match step {
            Step::Finish(_) => step,
            _ if cursor.attempt >= self.max_attempts => Step::Finish(ScanEnd::Exhausted {
                attempts: cursor.attempt,
                last_hit: cursor.last_hit.clone(),
            }),
            _ => step,
        };

        Ok(Transition {
            cursor,
            discovered,
            step,
        })
    }
}
