//! ID 生成器

use chrono::Utc;
use parking_lot::Mutex;

/// 实体 ID 生成器
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;

    fn next_string_id(&self) -> String {
        self.next_id().to_string()
    }
}

/// 自定义纪元：2024-01-01T00:00:00Z
const EPOCH_MS: i64 = 1_704_067_200_000;
const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

/// 雪花算法 ID：41 位毫秒时间戳 + 10 位节点号 + 12 位序列
///
/// 时钟回拨时沿用上一次的时间戳继续递增序列，保证单调。
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    worker_id: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIdGenerator {
    /// 节点号超过 1023 时取低 10 位
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id & MAX_WORKER_ID),
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }
}

impl Default for SnowflakeIdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> i64 {
        let mut state = self.state.lock();
        let mut now = (Utc::now().timestamp_millis() - EPOCH_MS).max(state.last_ms);

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // 本毫秒序列耗尽，借用下一毫秒
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        (now << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | state.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = SnowflakeIdGenerator::new(7);
        let ids: Vec<i64> = (0..10_000).map(|_| generator.next_id()).collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert!(ids.iter().all(|id| *id > 0));
    }

    #[test]
    fn test_worker_id_embedded() {
        let generator = SnowflakeIdGenerator::new(5);
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_WORKER_ID), 5);
        assert_eq!(SnowflakeIdGenerator::new(2048).worker_id(), 0);
    }

    #[test]
    fn test_string_id() {
        let generator = SnowflakeIdGenerator::default();
        assert!(generator.next_string_id().parse::<i64>().is_ok());
    }
}
