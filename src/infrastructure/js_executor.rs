//! JS 执行器 - 基础设施层
//!
//! 借用一个标签页，只暴露"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{AppResult, ExtractionError};

/// JS 执行器
///
/// 职责：
/// - 借用资源池借出的 Page
/// - 暴露 eval() 能力
/// - 不认识 WorkItem / Episode
pub struct JsExecutor<'a> {
    page: &'a Page,
}

impl<'a> JsExecutor<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self
            .page
            .evaluate(js_code.into())
            .await
            .map_err(|e| ExtractionError::ScriptFailed {
                reason: e.to_string(),
            })?;
        let json_value = result
            .into_value()
            .map_err(|e| ExtractionError::ScriptFailed {
                reason: e.to_string(),
            })?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value =
            serde_json::from_value(json_value).map_err(|e| ExtractionError::ScriptFailed {
                reason: e.to_string(),
            })?;
        Ok(typed_value)
    }

    /// 当前页面标题
    pub async fn title(&self) -> AppResult<String> {
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| ExtractionError::ScriptFailed {
                reason: e.to_string(),
            })?;
        Ok(title.unwrap_or_default())
    }
}
