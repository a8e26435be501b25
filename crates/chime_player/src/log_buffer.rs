//! 活动日志
//!
//! 只追加。每次追加后重新拼出完整的带编号文本（`"{i} - {msg}"`，换行分隔），
//! 整段作为 `LogUpdated` 发给 UI。

#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Vec<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条并返回完整文本
    pub fn push(&mut self, message: impl Into<String>) -> String {
        self.entries.push(message.into());
        self.text()
    }

    pub fn text(&self) -> String {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, msg)| format!("{} - {}", i, msg))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_full_text() {
        let mut log = LogBuffer::new();
        assert_eq!(log.push("create() engine allocated"), "0 - create() engine allocated");
        assert_eq!(
            log.push("pause()"),
            "0 - create() engine allocated\n1 - pause()"
        );
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_empty_buffer() {
        let log = LogBuffer::new();
        assert!(log.is_empty());
        assert_eq!(log.text(), "");
    }
}
