//! Prints events to stdout, one line each.

use std::sync::Arc;

use async_trait::async_trait;

use danmu_core::config::StreamConfig;
use danmu_core::dedup::{DedupCache, Deduplicated};
use danmu_core::error::HandlerError;
use danmu_core::event::{EventBody, LiveEvent};
use danmu_core::handler::{EventHandler, HandlerFactory};

pub struct ConsoleHandler {
    label: String,
}

impl ConsoleHandler {
    /// `label` prefixes every line; the room display id, name or task id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label_for(config: &StreamConfig) -> String {
        config
            .room_display_id
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(config.name.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| config.id.to_string())
    }

    /// The line printed for `event`, if it is printed at all.
    pub fn render(&self, event: &LiveEvent) -> Option<String> {
        let content = match &event.body {
            EventBody::Chat(c) => format!("[{}]: {}", c.user.nickname, c.content),
            EventBody::Member(m) => format!("{} joined, {} watching", m.user.nickname, m.member_count),
            EventBody::Social(s) => format!("{} followed, followers {}", s.user.nickname, s.follow_count),
            EventBody::Like(l) => format!("{} liked x{}, total {}", l.user.nickname, l.count, l.total),
            // the streak summary repeats what the individual gifts already said
            EventBody::Gift(g) if g.repeat_end => return None,
            EventBody::Gift(g) => format!(
                "{} sent {} x{} ({} diamonds)",
                g.user.nickname,
                g.gift_name,
                g.combo_count.unwrap_or(g.repeat_count).max(1),
                g.total_diamonds()
            ),
            EventBody::Unknown { .. } => return None,
        };
        Some(format!("room[{}]: {}", self.label, content))
    }
}

#[async_trait]
impl EventHandler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    async fn handle(&self, event: &LiveEvent) -> Result<(), HandlerError> {
        if let Some(line) = self.render(event) {
            println!("{line}");
        }
        Ok(())
    }
}

/// One deduplicated console printer per task.
pub struct ConsoleHandlers {
    dedup_capacity: usize,
}

impl ConsoleHandlers {
    pub fn new(dedup_capacity: usize) -> Self {
        Self { dedup_capacity }
    }
}

impl HandlerFactory for ConsoleHandlers {
    fn handlers_for(&self, config: &StreamConfig) -> Result<Vec<Arc<dyn EventHandler>>, HandlerError> {
        let cache = Arc::new(DedupCache::new(self.dedup_capacity));
        let handler: Arc<dyn EventHandler> = Arc::new(Deduplicated::new(
            ConsoleHandler::new(ConsoleHandler::label_for(config)),
            cache,
        ));
        Ok(vec![handler])
    }
}
