use crate::catalog::{Schema, Target};
use std::sync::Arc;

/// Lifecycle of a target within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Aborted => "aborted",
        }
    }
}

/// Per-target crawl state, owned by the retry controller while it runs
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub target: Arc<Target>,
    pub attempts: u32,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    /// Item fragments handed to the parse stage
    pub items: usize,
}

impl CrawlTask {
    pub fn new(target: Arc<Target>) -> Self {
        Self {
            target,
            attempts: 0,
            status: TaskStatus::Pending,
            last_error: None,
            items: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.target.key
    }

    /// Moves a pending task to `Succeeded`; terminal tasks are left alone
    pub fn succeed(&mut self, items: usize) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Succeeded;
            self.items = items;
        }
    }

    /// Moves a pending task to `Aborted`; terminal tasks are left alone
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Aborted;
            self.last_error = Some(reason.into());
        }
    }

    /// Aborts a succeeded task whose items never reached the parse stage
    pub fn revoke(&mut self, reason: impl Into<String>) {
        if self.status == TaskStatus::Succeeded {
            self.status = TaskStatus::Aborted;
            self.last_error = Some(reason.into());
        }
    }
}

/// One discovered listing item, handed from the crawl to the parse stage
#[derive(Debug, Clone)]
pub struct RawItem {
    pub target: Arc<Target>,
    pub schema: Arc<Schema>,
    /// Outer markup of the item
    pub fragment: String,
    /// Position of the item on its page
    pub ordinal: usize,
}

impl RawItem {
    /// Pairs each fragment with its position on the page
    pub fn from_fragments(
        target: &Arc<Target>,
        schema: &Arc<Schema>,
        fragments: Vec<String>,
    ) -> Vec<Self> {
        fragments
            .into_iter()
            .enumerate()
            .map(|(ordinal, fragment)| Self {
                target: Arc::clone(target),
                schema: Arc::clone(schema),
                fragment,
                ordinal,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn target() -> Arc<Target> {
        Arc::new(Target {
            key: "yljg".to_string(),
            description: String::new(),
            schema_id: "elderly_care_institutions".to_string(),
            url: Url::parse("https://mzj.sz.gov.cn/cn/isz/yljg/index.html").unwrap(),
            rules: Vec::new(),
        })
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut task = CrawlTask::new(target());
        assert!(!task.status.is_terminal());

        task.succeed(12);
        task.abort("late failure");

        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.items, 12);
        assert_eq!(task.last_error, None);
    }

    #[test]
    fn test_abort_records_reason() {
        let mut task = CrawlTask::new(target());
        task.abort("HTTP 404");
        task.succeed(3);

        assert_eq!(task.status, TaskStatus::Aborted);
        assert_eq!(task.last_error.as_deref(), Some("HTTP 404"));
        assert_eq!(task.items, 0);
        assert_eq!(task.status.as_str(), "aborted");
    }

    #[test]
    fn test_revoke_only_affects_succeeded() {
        let mut task = CrawlTask::new(target());
        task.revoke("queue closed");
        assert_eq!(task.status, TaskStatus::Pending);

        task.succeed(4);
        task.revoke("queue closed");
        assert_eq!(task.status, TaskStatus::Aborted);
        assert_eq!(task.last_error.as_deref(), Some("queue closed"));
    }

    #[test]
    fn test_raw_items_keep_page_order() {
        let schema = Arc::new(Schema {
            id: "elderly_care_institutions".to_string(),
            description: String::new(),
            natural_key: "name".to_string(),
            fields: Vec::new(),
        });
        let fragments = vec!["<div>a</div>".to_string(), "<div>b</div>".to_string()];

        let items = RawItem::from_fragments(&target(), &schema, fragments);

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].ordinal, 1);
        assert_eq!(items[1].fragment, "<div>b</div>");
        assert_eq!(items[0].schema.id, "elderly_care_institutions");
    }
}
