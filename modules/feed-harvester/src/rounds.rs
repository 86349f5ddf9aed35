use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::traits::RoundSource;

/// Rounds of fixed length counted from a genesis instant on the wall clock.
pub struct EpochRounds {
    genesis: DateTime<Utc>,
    length: Duration,
}

impl EpochRounds {
    pub fn new(genesis: DateTime<Utc>, length: Duration) -> Result<Self> {
        if length.is_zero() {
            bail!("Round length must be positive");
        }
        Ok(Self { genesis, length })
    }

    pub fn round_at(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.genesis).num_seconds();
        if elapsed <= 0 {
            return 0;
        }
        elapsed as u64 / self.length.as_secs().max(1)
    }
}

#[async_trait]
impl RoundSource for EpochRounds {
    async fn current_round(&self) -> Result<u64> {
        Ok(self.round_at(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly() -> EpochRounds {
        let genesis = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        EpochRounds::new(genesis, Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn counts_whole_rounds_since_genesis() {
        let rounds = hourly();
        assert_eq!(rounds.round_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 59, 59).unwrap()), 0);
        assert_eq!(rounds.round_at(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()), 1);
        assert_eq!(rounds.round_at(Utc.with_ymd_and_hms(2024, 1, 2, 0, 30, 0).unwrap()), 24);
    }

    #[test]
    fn before_genesis_is_round_zero() {
        let rounds = hourly();
        assert_eq!(rounds.round_at(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()), 0);
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(EpochRounds::new(Utc::now(), Duration::ZERO).is_err());
    }
}
