//! Rank Ladder
//!
//! Maps cumulative charge amount to a rank tier. Each tier carries a
//! coin/mile return rate (basis points) and a one-time rank-up bonus.
//! An empty `rank_settings` table falls back to the built-in ladder.

use crate::db::{RankSetting, RankTier};

const BPS_SCALE: i128 = 10_000;

/// `floor(amount * bps / 10000)`
pub fn apply_bps(amount: i64, bps: i64) -> i64 {
    if amount <= 0 || bps <= 0 {
        return 0;
    }
    ((amount as i128 * bps as i128) / BPS_SCALE) as i64
}

/// 랭크 테이블 (임계값 오름차순)
#[derive(Debug, Clone)]
pub struct RankLadder {
    settings: Vec<RankSetting>,
}

impl RankLadder {
    /// DB 설정으로 생성. 비어 있으면 기본 테이블 사용.
    pub fn from_settings(mut settings: Vec<RankSetting>) -> Self {
        if settings.is_empty() {
            return Self::default_ladder();
        }
        settings.sort_by_key(|s| (s.charge_threshold, s.rank));
        Self { settings }
    }

    /// 기본 랭크 테이블
    ///
    /// | rank | threshold | coin | mile | bonus |
    /// |---|---|---|---|---|
    /// | BEGINNER | 0 | 0% | 0% | 0 |
    /// | BRONZE | 10,000 | 1% | 0.5% | 500 |
    /// | SILVER | 30,000 | 2% | 1% | 1,500 |
    /// | GOLD | 100,000 | 3% | 1.5% | 5,000 |
    /// | PLATINUM | 300,000 | 4% | 2% | 15,000 |
    /// | DIAMOND | 1,000,000 | 5% | 3% | 50,000 |
    pub fn default_ladder() -> Self {
        let rows = [
            (RankTier::Beginner, 0, 0, 0, 0),
            (RankTier::Bronze, 10_000, 100, 50, 500),
            (RankTier::Silver, 30_000, 200, 100, 1_500),
            (RankTier::Gold, 100_000, 300, 150, 5_000),
            (RankTier::Platinum, 300_000, 400, 200, 15_000),
            (RankTier::Diamond, 1_000_000, 500, 300, 50_000),
        ];
        let settings = rows
            .iter()
            .enumerate()
            .map(|(i, &(rank, threshold, coin_bps, mile_bps, bonus))| RankSetting {
                rank,
                charge_threshold: threshold,
                coin_return_bps: coin_bps,
                mile_return_bps: mile_bps,
                rank_up_bonus: bonus,
                sort_order: i as i32,
            })
            .collect();
        Self { settings }
    }

    /// 누적 충전액에 해당하는 랭크
    pub fn tier_for(&self, cumulative_spend: i64) -> RankTier {
        self.settings
            .iter()
            .filter(|s| s.charge_threshold <= cumulative_spend)
            .map(|s| s.rank)
            .max()
            .unwrap_or(RankTier::Beginner)
    }

    pub fn setting(&self, rank: RankTier) -> Option<&RankSetting> {
        self.settings.iter().find(|s| s.rank == rank)
    }

    pub fn coin_return(&self, rank: RankTier, coins: i64) -> i64 {
        self.setting(rank)
            .map(|s| apply_bps(coins, s.coin_return_bps))
            .unwrap_or(0)
    }

    pub fn mile_return(&self, rank: RankTier, coins: i64) -> i64 {
        self.setting(rank)
            .map(|s| apply_bps(coins, s.mile_return_bps))
            .unwrap_or(0)
    }

    /// 랭크업 보너스 후보: `from..=to` 범위, BEGINNER 제외, 등급 순
    pub fn bonus_tiers(&self, from: RankTier, to: RankTier) -> Vec<&RankSetting> {
        let mut tiers: Vec<&RankSetting> = self
            .settings
            .iter()
            .filter(|s| s.rank != RankTier::Beginner && s.rank >= from && s.rank <= to)
            .collect();
        tiers.sort_by_key(|s| s.rank);
        tiers
    }
}

impl Default for RankLadder {
    fn default() -> Self {
        Self::default_ladder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bps_floors() {
        assert_eq!(apply_bps(10_000, 100), 100);
        assert_eq!(apply_bps(999, 100), 9);
        assert_eq!(apply_bps(1, 9_999), 0);
        assert_eq!(apply_bps(0, 500), 0);
        assert_eq!(apply_bps(i64::MAX, 10_000), i64::MAX);
    }

    #[test]
    fn test_tier_for_spend() {
        let ladder = RankLadder::default_ladder();
        assert_eq!(ladder.tier_for(0), RankTier::Beginner);
        assert_eq!(ladder.tier_for(9_999), RankTier::Beginner);
        assert_eq!(ladder.tier_for(10_000), RankTier::Bronze);
        assert_eq!(ladder.tier_for(250_000), RankTier::Gold);
        assert_eq!(ladder.tier_for(5_000_000), RankTier::Diamond);
    }

    #[test]
    fn test_empty_settings_fall_back_to_default() {
        let ladder = RankLadder::from_settings(vec![]);
        assert_eq!(ladder.tier_for(30_000), RankTier::Silver);
    }

    #[test]
    fn test_custom_settings_without_beginner_row() {
        let ladder = RankLadder::from_settings(vec![RankSetting {
            rank: RankTier::Gold,
            charge_threshold: 50_000,
            coin_return_bps: 1_000,
            mile_return_bps: 0,
            rank_up_bonus: 7_777,
            sort_order: 0,
        }]);

        assert_eq!(ladder.tier_for(49_999), RankTier::Beginner);
        assert_eq!(ladder.coin_return(RankTier::Beginner, 10_000), 0);
        assert_eq!(ladder.tier_for(50_000), RankTier::Gold);
        assert_eq!(ladder.coin_return(RankTier::Gold, 10_000), 1_000);
    }

    #[test]
    fn test_bonus_tiers_range() {
        let ladder = RankLadder::default_ladder();

        let tiers: Vec<RankTier> = ladder
            .bonus_tiers(RankTier::Beginner, RankTier::Gold)
            .iter()
            .map(|s| s.rank)
            .collect();
        assert_eq!(tiers, vec![RankTier::Bronze, RankTier::Silver, RankTier::Gold]);

        let same: Vec<RankTier> = ladder
            .bonus_tiers(RankTier::Silver, RankTier::Silver)
            .iter()
            .map(|s| s.rank)
            .collect();
        assert_eq!(same, vec![RankTier::Silver]);

        assert!(ladder.bonus_tiers(RankTier::Beginner, RankTier::Beginner).is_empty());
    }
}
