pub mod types;
pub mod traits;
pub mod rss_utils;
pub mod parser;
pub mod fetcher;
pub mod store;
pub mod queue;
pub mod scheduler;
pub mod publish;
pub mod telegraph;
pub mod render;
pub mod distributor;
pub mod subscriptions;
pub mod notify;
pub mod config;
pub mod logging;

pub use types::*;
pub use traits::*;
pub use parser::FeedParser;
pub use fetcher::HttpFetcher;
pub use store::{dedup_key, MemoryStore, SqliteStore};
pub use queue::{hand_off_queue, ItemReceiver, ItemSender};
pub use scheduler::Scheduler;
pub use publish::{PublishHandle, PublishPool, PublishPoolConfig};
pub use telegraph::{TelegraphAccounts, TelegraphClient};
pub use render::TemplateRenderer;
pub use distributor::{DeliveryReport, Distributor, DistributorHandle, SkipReason};
pub use subscriptions::StaticSubscriptions;
pub use notify::LogNotifier;
pub use config::{LogMode, LogSettings, RelayConfig};
