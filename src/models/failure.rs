use serde::Serialize;

/// 一条失败记录，只写一次，供运行结束后人工检查
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub timestamp: String,
    pub instance: String,
    pub item: String,
    pub unit: String,
    pub url: String,
    pub attempt: u32,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(
        instance: impl Into<String>,
        item: impl Into<String>,
        unit: impl Into<String>,
        url: impl Into<String>,
        attempt: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            instance: instance.into(),
            item: item.into(),
            unit: unit.into(),
            url: url.into(),
            attempt,
            reason: reason.into(),
        }
    }
}
