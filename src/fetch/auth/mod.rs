//! Feed key injection, chosen per feed from [`FeedAuth`](crate::config::FeedAuth).

mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;
