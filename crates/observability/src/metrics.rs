//! 采集与录制指标
//!
//! 指标名统一以 `fusion_` 开头，标签为传感器 / 流 / 编码器名。

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};

/// 记录 supervisor 收到的一帧
pub fn record_frame_received(sensor: &str, stream: &str) {
    counter!(
        "fusion_frames_received_total",
        "sensor" => sensor.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// 显示队列满时被挤掉的帧
pub fn record_display_dropped(stream: &str) {
    counter!(
        "fusion_display_frames_dropped_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// 录制路径检测到的缺帧（序号间隙或乱序过晚）
pub fn record_recording_dropped(stream: &str, count: u64) {
    if count > 0 {
        counter!(
            "fusion_recording_frames_dropped_total",
            "stream" => stream.to_string()
        )
        .increment(count);
    }
}

/// 录制队列积压深度
pub fn record_recording_backlog(stream: &str, depth: usize) {
    gauge!(
        "fusion_recording_backlog",
        "stream" => stream.to_string()
    )
    .set(depth as f64);
}

/// 单帧编码耗时
pub fn record_encode_latency_ms(encoder: &str, latency_ms: f64) {
    counter!(
        "fusion_frames_encoded_total",
        "encoder" => encoder.to_string()
    )
    .increment(1);
    histogram!(
        "fusion_encode_latency_ms",
        "encoder" => encoder.to_string()
    )
    .record(latency_ms);
}

/// Worker 状态迁移
pub fn record_worker_state(sensor: &str, state: &str) {
    counter!(
        "fusion_worker_transitions_total",
        "sensor" => sensor.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// 统计摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
