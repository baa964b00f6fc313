//! A simple CLI tool for verifying exported vote audit logs.
//! This uses the same hashing primitives as the server, and is by definition
//! compatible with the output of our API endpoints.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use audit_chain::{entry_hash, merkle_root, EntryHash};
use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use chainvote_backend::model::api::audit::AuditDump;

const PROGRAM_NAME: &str = "verify-audit";

const ABOUT_TEXT: &str = "Verify the integrity of an exported vote audit log.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const DUMP_PATH: &str = "DUMP_PATH";

const DUMP_PATH_HELP: &str = "The path to a JSON dump of an election's audit log,\n\
as returned by `GET /elections/<election_id>/audit/dump`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(DUMP_PATH)
            .help(DUMP_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, PartialEq, Eq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// Verification failed due to the contained reason.
    Verification(VerificationFailure),
}

/// Ways an audit dump can fail verification.
#[derive(Debug, PartialEq, Eq)]
enum VerificationFailure {
    /// Entries are out of order, or one is missing.
    Sequence { expected: u64, got: u64 },
    /// An entry's content hash does not match its fields.
    ContentHash { sequence: u64 },
    /// The claimed root does not match the recomputed one.
    Root {
        claimed: Option<EntryHash>,
        computed: Option<EntryHash>,
    },
}

impl Display for VerificationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequence { expected, got } => {
                write!(f, "Expected sequence number {expected} but found {got}; an entry was removed or reordered.")
            }
            Self::ContentHash { sequence } => {
                write!(f, "Entry {sequence} does not hash to its recorded content hash; its fields were altered.")
            }
            Self::Root { claimed, computed } => {
                write!(
                    f,
                    "The dump claims root {} but the entries fold to {}.",
                    display_root(claimed),
                    display_root(computed)
                )
            }
        }
    }
}

fn display_root(root: &Option<EntryHash>) -> String {
    match root {
        Some(root) => root.to_string(),
        None => "<empty log>".to_string(),
    }
}

/// A friendly summary of a verified dump.
#[derive(Debug, PartialEq, Eq)]
struct Summary {
    election_id: String,
    entries: u64,
    root: Option<EntryHash>,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Election {}: {} entr{}, root {}",
            self.election_id,
            self.entries,
            if self.entries == 1 { "y" } else { "ies" },
            display_root(&self.root)
        )
    }
}

/// Check every entry and the claimed root.
fn verify_dump(dump: &AuditDump) -> Result<Summary, VerificationFailure> {
    let mut hashes = Vec::with_capacity(dump.entries.len());

    for (position, entry) in dump.entries.iter().enumerate() {
        // Sequences must run 0, 1, 2, ... with no gaps.
        let expected = position as u64;
        if entry.sequence != expected {
            return Err(VerificationFailure::Sequence {
                expected,
                got: entry.sequence,
            });
        }

        // Each entry must hash to its recorded content address.
        let recomputed = entry_hash(
            &entry.voter_id,
            &dump.election_id,
            entry.candidate_ledger_id,
            &entry.cast_at,
        );
        if recomputed != entry.content_hash {
            return Err(VerificationFailure::ContentHash {
                sequence: entry.sequence,
            });
        }
        hashes.push(entry.content_hash);
    }

    // The entries must fold to the claimed root.
    let computed = merkle_root(&hashes);
    if computed != dump.root_hash {
        return Err(VerificationFailure::Root {
            claimed: dump.root_hash,
            computed,
        });
    }

    Ok(Summary {
        election_id: dump.election_id.clone(),
        entries: dump.entries.len() as u64,
        root: computed,
    })
}

/// Run verification on the dump at the given path.
fn verify(path: &str) -> Result<Summary, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: AuditDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;
    verify_dump(&dump).map_err(Error::Verification)
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(DUMP_PATH).unwrap(); // Required argument is guaranteed to be present.
    match verify(path) {
        Ok(summary) => {
            println!("Verification succeeded.");
            println!("{summary}");
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::Verification(failure)) => {
            println!("Verification failed: {failure}");
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::Utc;

    use chainvote_backend::model::{
        api::audit::AuditEntryDesc,
        db::audit::{canonical_timestamp, NewAuditEntry},
        mongodb::Id,
    };

    use super::*;

    /// Build a valid dump with the given number of entries.
    fn dump(entries: u64) -> AuditDump {
        let election_id = Id::new();
        let descs: Vec<AuditEntryDesc> = (0..entries)
            .map(|sequence| {
                let entry = NewAuditEntry::new(election_id, Id::new(), sequence + 1, Utc::now());
                AuditEntryDesc {
                    sequence,
                    voter_id: entry.voter_id.to_hex(),
                    candidate_ledger_id: entry.candidate_ledger_id,
                    cast_at: canonical_timestamp(entry.cast_at),
                    content_hash: entry.content_hash,
                }
            })
            .collect();
        let hashes: Vec<EntryHash> = descs.iter().map(|desc| desc.content_hash).collect();
        AuditDump {
            election_id: election_id.to_hex(),
            root_hash: merkle_root(&hashes),
            entries: descs,
        }
    }

    #[test]
    fn valid_dumps_verify() {
        for size in [0, 1, 2, 5] {
            let summary = verify_dump(&dump(size)).unwrap();
            assert_eq!(summary.entries, size);
            assert_eq!(summary.root.is_some(), size > 0);
        }
    }

    #[test]
    fn removed_entry_is_detected() {
        let mut tampered = dump(3);
        tampered.entries.remove(1);
        assert_eq!(
            verify_dump(&tampered),
            Err(VerificationFailure::Sequence {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn altered_entry_is_detected() {
        let mut tampered = dump(3);
        // Move a vote to a different candidate without rehashing.
        tampered.entries[2].candidate_ledger_id += 1;
        assert_eq!(
            verify_dump(&tampered),
            Err(VerificationFailure::ContentHash { sequence: 2 })
        );
    }

    #[test]
    fn rewritten_root_is_detected() {
        let mut tampered = dump(2);
        let claimed = Some(entry_hash("not", "the", 0, "log"));
        tampered.root_hash = claimed;
        match verify_dump(&tampered) {
            Err(VerificationFailure::Root { claimed: c, .. }) => assert_eq!(c, claimed),
            other => panic!("expected root failure, got {other:?}"),
        }
    }

    #[test]
    fn rehashed_entry_still_breaks_the_root() {
        // An attacker who alters an entry *and* fixes up its content hash
        // is still caught by the root.
        let mut tampered = dump(3);
        let entry = &mut tampered.entries[1];
        entry.candidate_ledger_id += 1;
        entry.content_hash = entry_hash(
            &entry.voter_id,
            &tampered.election_id,
            entry.candidate_ledger_id,
            &entry.cast_at,
        );
        assert!(matches!(
            verify_dump(&tampered),
            Err(VerificationFailure::Root { .. })
        ));
    }

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn correct_cli_usage() {
        let valid = write_temp(
            "audit_cli_valid.json",
            &serde_json::to_string(&dump(2)).unwrap(),
        );
        let args = cli().try_get_matches_from([PROGRAM_NAME, &valid]).unwrap();
        assert_eq!(run(&args), 0);

        let mut tampered = dump(2);
        tampered.entries.swap(0, 1);
        let invalid = write_temp(
            "audit_cli_invalid.json",
            &serde_json::to_string(&tampered).unwrap(),
        );
        let args = cli().try_get_matches_from([PROGRAM_NAME, &invalid]).unwrap();
        assert_eq!(run(&args), 255);

        let malformed = write_temp("audit_cli_malformed.json", "{not json");
        let args = cli()
            .try_get_matches_from([PROGRAM_NAME, &malformed])
            .unwrap();
        assert_eq!(run(&args), 1);

        let args = cli()
            .try_get_matches_from([PROGRAM_NAME, "not a real file"])
            .unwrap();
        assert_eq!(run(&args), 1);
    }

    #[test]
    fn bad_cli_usage() {
        // Something very wrong.
        let command_line = [PROGRAM_NAME, "this", "invocation", "is", "incorrect"];
        cli().try_get_matches_from(command_line).unwrap_err();

        // No options at all.
        let command_line = [PROGRAM_NAME];
        cli().try_get_matches_from(command_line).unwrap_err();
    }
}
