//! User-facing notifications.
//!
//! A lossy broadcast: if nothing is listening (headless tests, background
//! tabs) notices vanish instead of backing anything up. Texts are delivered
//! verbatim — there is deliberately no filtering on error-looking content.

use tokio::sync::broadcast;
use tracing::debug;

const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(NoticeLevel::Info, text.into());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(NoticeLevel::Error, text.into());
    }

    fn emit(&self, level: NoticeLevel, text: String) {
        debug!("notice [{:?}]: {}", level, text);
        let _ = self.tx.send(Notice { level, text });
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let notices = Notices::new();
        let mut a = notices.subscribe();
        let mut b = notices.subscribe();

        notices.error("could not join event");

        assert_eq!(a.recv().await.unwrap().text, "could not join event");
        assert_eq!(b.recv().await.unwrap().level, NoticeLevel::Error);
    }

    #[test]
    fn no_subscribers_is_fine() {
        let notices = Notices::new();
        notices.info("nobody is listening");
    }
}
