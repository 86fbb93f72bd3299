mod http;

pub use http::HttpAdapter;
