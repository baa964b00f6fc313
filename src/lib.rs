#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod reconciler;
pub mod store;

use config::{ConfigFairing, DatabaseFairing, LedgerFairing};
use coordinator::CoordinatorFairing;
use logging::LoggerFairing;
use reconciler::ReconcilerFairing;

/// Assemble the server. Fairing order matters: the coordinator is built
/// from the database and ledger connections, and the reconciliation worker
/// starts only once all of them are in place.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LedgerFairing)
        .attach(CoordinatorFairing)
        .attach(ReconcilerFairing)
        .attach(LoggerFairing)
}
