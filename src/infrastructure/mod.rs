pub mod http;
pub mod retry;

pub use http::{FetchResponse, HttpFetcher, MockFetcher, ReqwestFetcher};
pub use retry::RetryPolicy;
