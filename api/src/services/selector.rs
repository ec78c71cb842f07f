//! Weighted Selector
//!
//! Picks one prize slot among candidates with probability proportional to
//! weight, skipping exhausted slots.
//!
//! ```text
//! weights:   [ 5 ][   10   ][ 1 ]        total = 16
//! point:     0 ... 4 | 5 ... 14 | 15      uniform in [0, 16)
//! ```
//!
//! Randomness comes from an injected `SecureRandomSource`; production uses
//! the operating system CSPRNG.

use std::sync::Mutex;

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use thiserror::Error;
use uuid::Uuid;

use crate::error::EngineError;

/// 균등 분포 난수 소스
pub trait SecureRandomSource: Send + Sync {
    /// `[0, n)` 범위의 균등 정수. `n > 0`.
    fn next_u64_below(&self, n: u64) -> u64;
}

/// OS CSPRNG (getrandom)
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandomSource for OsRandom {
    fn next_u64_below(&self, n: u64) -> u64 {
        OsRng.gen_range(0..n)
    }
}

/// 재현 가능한 난수 소스 (테스트, 시뮬레이션)
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SecureRandomSource for SeededRandom {
    fn next_u64_below(&self, n: u64) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0..n)
    }
}

/// 선택 후보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub slot_id: Uuid,
    pub prize_id: Uuid,
    pub weight: i64,
    pub remaining: i64,
}

impl Candidate {
    fn is_eligible(&self) -> bool {
        self.remaining > 0 && self.weight > 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("no slot with remaining inventory")]
    ExhaustedInventory,

    #[error("last-unit prize {0} has no slot in this pack")]
    LastUnitMissing(Uuid),

    #[error("last-unit prize {0} is already exhausted")]
    LastUnitExhausted(Uuid),

    #[error("total weight of eligible slots exceeds u64")]
    WeightOverflow,
}

/// 셀렉터 실패는 데이터 정합성 문제 (재고 카운터 불일치)
impl From<SelectorError> for EngineError {
    fn from(err: SelectorError) -> Self {
        EngineError::Integrity(err.to_string())
    }
}

/// 가중치 기반 선택. 반환값은 `candidates` 내 인덱스.
///
/// 남은 수량이 0인 후보는 가중치 합계에서 제외됨.
pub fn select_weighted(
    candidates: &[Candidate],
    rng: &dyn SecureRandomSource,
) -> Result<usize, SelectorError> {
    let total_weight = candidates
        .iter()
        .filter(|c| c.is_eligible())
        .try_fold(0u64, |acc, c| acc.checked_add(c.weight as u64))
        .ok_or(SelectorError::WeightOverflow)?;

    if total_weight == 0 {
        return Err(SelectorError::ExhaustedInventory);
    }

    let mut point = rng.next_u64_below(total_weight);
    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_eligible() {
            continue;
        }
        let weight = candidate.weight as u64;
        if point < weight {
            return Ok(index);
        }
        point -= weight;
    }

    Err(SelectorError::ExhaustedInventory)
}

/// 마지막 1개 보장 상품 강제 선택 (가중치 무시)
pub fn select_last_unit(candidates: &[Candidate], prize_id: Uuid) -> Result<usize, SelectorError> {
    let index = candidates
        .iter()
        .position(|c| c.prize_id == prize_id)
        .ok_or(SelectorError::LastUnitMissing(prize_id))?;

    if candidates[index].remaining <= 0 {
        return Err(SelectorError::LastUnitExhausted(prize_id));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// 항상 같은 값을 돌려주는 소스
    struct FixedPoint(AtomicU64);

    impl SecureRandomSource for FixedPoint {
        fn next_u64_below(&self, n: u64) -> u64 {
            self.0.load(Ordering::SeqCst) % n
        }
    }

    fn candidate(weight: i64, remaining: i64) -> Candidate {
        Candidate {
            slot_id: Uuid::new_v4(),
            prize_id: Uuid::new_v4(),
            weight,
            remaining,
        }
    }

    #[test]
    fn test_point_maps_to_bucket() {
        let candidates = vec![candidate(5, 1), candidate(10, 1), candidate(1, 1)];

        for (point, expected) in [(0, 0), (4, 0), (5, 1), (14, 1), (15, 2)] {
            let rng = FixedPoint(AtomicU64::new(point));
            assert_eq!(select_weighted(&candidates, &rng).unwrap(), expected);
        }
    }

    #[test]
    fn test_exhausted_slots_are_skipped() {
        // 두 번째 슬롯은 소진 -> 가중치 합계 6
        let candidates = vec![candidate(5, 1), candidate(100, 0), candidate(1, 1)];

        let rng = FixedPoint(AtomicU64::new(5));
        assert_eq!(select_weighted(&candidates, &rng).unwrap(), 2);
    }

    #[test]
    fn test_weight_overflow_is_an_error() {
        let rng = SeededRandom::new(1);
        let huge = vec![
            candidate(i64::MAX, 1),
            candidate(i64::MAX, 1),
            candidate(i64::MAX, 1),
        ];
        assert_eq!(select_weighted(&huge, &rng), Err(SelectorError::WeightOverflow));

        // u64 범위 안의 큰 가중치는 정상 선택
        let large = vec![candidate(i64::MAX, 1), candidate(i64::MAX, 1)];
        assert!(select_weighted(&large, &rng).is_ok());

        // 소진된 슬롯의 가중치는 합계에 들어가지 않음
        let mixed = vec![candidate(i64::MAX, 1), candidate(i64::MAX, 0), candidate(i64::MAX, 1)];
        assert!(select_weighted(&mixed, &rng).is_ok());
    }

    #[test]
    fn test_all_exhausted() {
        let candidates = vec![candidate(5, 0), candidate(10, 0)];
        let rng = SeededRandom::new(7);
        assert_eq!(
            select_weighted(&candidates, &rng),
            Err(SelectorError::ExhaustedInventory)
        );
        assert_eq!(select_weighted(&[], &rng), Err(SelectorError::ExhaustedInventory));
    }

    #[test]
    fn test_distribution_follows_weights() {
        let candidates = vec![candidate(1, 1_000_000), candidate(3, 1_000_000)];
        let rng = SeededRandom::new(42);

        let mut hits = [0u32; 2];
        for _ in 0..40_000 {
            hits[select_weighted(&candidates, &rng).unwrap()] += 1;
        }

        // 기대값 10,000 / 30,000
        assert!((9_000..11_000).contains(&hits[0]), "hits = {:?}", hits);
        assert!((29_000..31_000).contains(&hits[1]), "hits = {:?}", hits);
    }

    #[test]
    fn test_last_unit_ignores_weight() {
        let rare = candidate(1, 1);
        let candidates = vec![candidate(1000, 5), rare.clone()];
        assert_eq!(select_last_unit(&candidates, rare.prize_id).unwrap(), 1);
    }

    #[test]
    fn test_last_unit_exhausted_is_an_error() {
        let rare = candidate(1, 0);
        let candidates = vec![candidate(1000, 5), rare.clone()];
        assert_eq!(
            select_last_unit(&candidates, rare.prize_id),
            Err(SelectorError::LastUnitExhausted(rare.prize_id))
        );

        let missing = Uuid::new_v4();
        assert_eq!(
            select_last_unit(&candidates, missing),
            Err(SelectorError::LastUnitMissing(missing))
        );
    }

    #[test]
    fn test_os_random_stays_in_range() {
        for n in [1u64, 2, 7, 1_000] {
            for _ in 0..100 {
                assert!(OsRandom.next_u64_below(n) < n);
            }
        }
    }
}
