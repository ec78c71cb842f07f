//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use serde::{Deserialize, Serialize};

/// API 응답 래퍼
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// 1회 추첨 수량 (1연차 / 10연차)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct UnitCount(u32);

impl UnitCount {
    pub const SINGLE: UnitCount = UnitCount(1);
    pub const TEN: UnitCount = UnitCount(10);

    pub fn new(units: u32) -> Result<Self, String> {
        match units {
            1 | 10 => Ok(Self(units)),
            other => Err(format!("unit count must be 1 or 10, got {}", other)),
        }
    }

    pub fn get(&self) -> i64 {
        self.0 as i64
    }
}

impl TryFrom<u32> for UnitCount {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitCount> for u32 {
    fn from(units: UnitCount) -> Self {
        units.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_count_valid() {
        assert_eq!(UnitCount::new(1).unwrap(), UnitCount::SINGLE);
        assert_eq!(UnitCount::new(10).unwrap().get(), 10);
    }

    #[test]
    fn test_unit_count_invalid() {
        assert!(UnitCount::new(0).is_err());
        assert!(UnitCount::new(5).is_err());
        assert!(UnitCount::new(11).is_err());
    }

    #[test]
    fn test_unit_count_deserialize() {
        let units: UnitCount = serde_json::from_str("10").unwrap();
        assert_eq!(units, UnitCount::TEN);
        assert!(serde_json::from_str::<UnitCount>("3").is_err());
    }
}
