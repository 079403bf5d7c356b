//! Store connection settings shared by the gateway and the model server.

use serde::Deserialize;

/// Where the coordination store lives and which queue key to use.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    /// Name of the list holding pending jobs.
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Turn on keyspace notifications (`CONFIG SET notify-keyspace-events KEA`)
    /// at startup instead of relying on the server being configured already.
    #[serde(default)]
    pub enable_keyspace_events: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            db: 0,
            queue: default_queue(),
            enable_keyspace_events: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    6379
}
fn default_username() -> String {
    "default".to_string()
}
fn default_queue() -> String {
    "image_queue".to_string()
}
