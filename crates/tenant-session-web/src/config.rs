use clap::Parser;

/// Configuration for the tenant-session-web server.
#[derive(Parser, Debug, Clone)]
#[command(name = "tenant-session-web")]
#[command(about = "HTTP service managing per-tenant resource sessions across each request")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// Public base URL of the site, used for the error page redirect.
    /// Falls back to the request's Host header when unset.
    #[arg(long, env = "SITE_URL")]
    pub site_url: Option<String>,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
