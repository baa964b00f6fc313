use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::ledger::HttpLedgerClient;
use crate::model::mongodb::ensure_indexes_exist;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    ledger_url: String,
    ledger_timeout: u32,
    ledger_retries: u32,
    ledger_backoff_ms: u64,
    reconcile_interval: u32,
    reconcile_grace: u32,
    reconcile_escalate: u32,
    anchor_batch: u64,
    // secrets
    relayer_key: String,
}

impl Config {
    /// Base URL of the ledger relayer gateway.
    pub fn ledger_url(&self) -> &str {
        &self.ledger_url
    }

    /// Bound on any single ledger gateway request, in seconds.
    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout.into())
    }

    /// How many times a transient submission failure is retried in-line
    /// before the vote is left to the reconciliation worker.
    pub fn ledger_retries(&self) -> u32 {
        self.ledger_retries
    }

    /// Initial backoff between in-line submission retries; doubles each try.
    pub fn ledger_backoff(&self) -> Duration {
        Duration::from_millis(self.ledger_backoff_ms)
    }

    /// Seconds between reconciliation passes.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval.into())
    }

    /// How old a pending vote must be before the reconciliation worker
    /// touches it. Shields votes whose live submission is still in flight.
    pub fn reconcile_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_grace.into())
    }

    /// How long a vote may stay pending before each further failure raises
    /// an operator alert.
    pub fn reconcile_escalate(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_escalate.into())
    }

    /// How many new audit entries accumulate before the next Merkle-root
    /// checkpoint is published to the ledger.
    pub fn anchor_batch(&self) -> u64 {
        self.anchor_batch
    }

    /// Shared key authenticating us to the relayer gateway.
    pub fn relayer_key(&self) -> &[u8] {
        self.relayer_key.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist. The vote and audit uniqueness
        // guarantees depend on them.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "chainvote".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// A fairing that connects to the ledger relayer gateway and places the
/// client into managed state.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger gateway",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.state::<Config>() {
            Some(config) => config,
            None => {
                error!("Ledger fairing requires the config fairing");
                return Err(rocket);
            }
        };

        // Construct the connection.
        let client = match HttpLedgerClient::connect(config).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to ledger gateway: {e}");
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(Arc::new(client));
        Ok(rocket)
    }
}
