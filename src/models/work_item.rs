use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 待处理文件的标识（文件路径）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(PathBuf);

impl ItemId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// 文件名，同时作为锁文件的键
    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// 一个 JSON 文件：若干部动画，每部动画若干剧集
///
/// 未识别的字段原样保留，写回时不会丢失。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(rename = "anime", default)]
    pub units: Vec<Unit>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// 一部动画
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// 一集：输入 URL 和可为空的提取结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub url: String,
    #[serde(default)]
    pub iframe_url: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub extract_attempts: u32,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// 剧集在文件中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRef {
    pub unit: usize,
    pub episode: usize,
}

impl Episode {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            iframe_url: None,
            extract_attempts: 0,
            extra: Map::new(),
        }
    }

    /// 已有结果的剧集视为完成，永远不再处理
    pub fn is_done(&self) -> bool {
        self.iframe_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

impl Unit {
    /// 用于日志显示的名称
    pub fn label(&self) -> String {
        ["title", "id", "name"]
            .iter()
            .find_map(|key| match self.extra.get(*key) {
                Some(JsonValue::String(s)) => Some(s.clone()),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl WorkItem {
    pub fn episode(&self, r: EpisodeRef) -> &Episode {
        &self.units[r.unit].episodes[r.episode]
    }

    pub fn episode_mut(&mut self, r: EpisodeRef) -> &mut Episode {
        &mut self.units[r.unit].episodes[r.episode]
    }

    /// 按顺序遍历所有剧集及其位置
    pub fn episodes(&self) -> impl Iterator<Item = (EpisodeRef, &Episode)> {
        self.units.iter().enumerate().flat_map(|(u, unit)| {
            unit.episodes
                .iter()
                .enumerate()
                .map(move |(e, ep)| (EpisodeRef { unit: u, episode: e }, ep))
        })
    }

    pub fn total_episodes(&self) -> usize {
        self.units.iter().map(|u| u.episodes.len()).sum()
    }

    pub fn done_episodes(&self) -> usize {
        self.episodes().filter(|(_, ep)| ep.is_done()).count()
    }
}
