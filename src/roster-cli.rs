//! An operator tool for issuing voting IDs to a whole roster at once.
//! It talks to the backend configured in `Rocket.toml`, through the same store
//! code as the server, so IDs it issues never collide with ones the server issued.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use rocket::serde::json::serde_json;
use thiserror::Error;

use votesheet_backend::{
    model::{RosterPlan, RosterReport},
    store::Stores,
};

const PROGRAM_NAME: &str = "roster-cli";

const ABOUT_TEXT: &str = "Issue voting IDs to every roll number of every class and section.

EXIT CODES:
     0: Success.
     1: Error.
     2: Populate stopped part way; the report lists what was written.";

const PLAN: &str = "plan";
const POPULATE: &str = "populate";
const CLASSES: &str = "CLASSES";
const SECTIONS: &str = "SECTIONS";
const ROLL_LIMIT: &str = "ROLL_LIMIT";
const JSON: &str = "JSON";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let roster_args = [
        Arg::new(CLASSES)
            .long("class")
            .help("Classes to cover, comma separated or repeated")
            .value_delimiter(',')
            .action(ArgAction::Append)
            .required(true),
        Arg::new(SECTIONS)
            .long("section")
            .help("Sections of every class, comma separated or repeated")
            .value_delimiter(',')
            .action(ArgAction::Append)
            .required(true),
        Arg::new(ROLL_LIMIT)
            .long("roll-limit")
            .help("Highest roll number in every section")
            .value_parser(value_parser!(u32))
            .action(ArgAction::Set)
            .required(true),
        Arg::new(JSON)
            .long("json")
            .help("Print the full result as JSON")
            .action(ArgAction::SetTrue),
    ];

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(
            Command::new(PLAN)
                .about("Show the IDs that would be issued, without writing anything")
                .args(roster_args.clone()),
        )
        .subcommand(
            Command::new(POPULATE)
                .about("Issue IDs to every roster slot that does not have one yet")
                .args(roster_args),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Error)]
enum Error {
    #[error("Failed to configure the backend: {0}")]
    Launch(#[from] rocket::Error),
    #[error("Backend state missing after ignition")]
    NoStores,
    #[error(transparent)]
    Store(#[from] votesheet_backend::error::Error),
    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// The roster described on the command line.
#[derive(Debug, PartialEq, Eq)]
struct Roster {
    classes: Vec<String>,
    sections: Vec<String>,
    roll_limit: u32,
}

impl Roster {
    fn from_args(args: &ArgMatches) -> Self {
        let list = |id: &str| -> Vec<String> {
            args.get_many::<String>(id)
                .unwrap_or_default()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        };
        Self {
            classes: list(CLASSES),
            sections: list(SECTIONS),
            roll_limit: args.get_one::<u32>(ROLL_LIMIT).copied().unwrap_or_default(), // Required argument.
        }
    }
}

async fn plan(stores: &Stores, roster: &Roster) -> Result<RosterPlan, Error> {
    Ok(stores
        .credentials
        .plan_roster(&roster.classes, &roster.sections, roster.roll_limit)
        .await?)
}

async fn populate(stores: &Stores, roster: &Roster) -> Result<RosterReport, Error> {
    Ok(stores
        .credentials
        .populate_roster(&roster.classes, &roster.sections, roster.roll_limit)
        .await?)
}

/// Run the chosen command, print the result, and return the exit code.
async fn execute(stores: &Stores, command: &str, args: &ArgMatches) -> Result<u8, Error> {
    let roster = Roster::from_args(args);
    let json = args.get_flag(JSON);
    match command {
        PLAN => {
            let plan = plan(stores, &roster).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for voter in &plan.voters {
                    println!(
                        "{}  class {} section {} roll {}",
                        voter.voting_id, voter.slot.class, voter.slot.section, voter.slot.roll_no
                    );
                }
                println!(
                    "{} slots, {} already registered, {} to issue.",
                    plan.slots,
                    plan.already_registered,
                    plan.voters.len()
                );
            }
            Ok(0)
        }
        _ => {
            let report = populate(stores, &roster).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let batch = &report.batch;
                println!(
                    "{} slots, {} already registered, {} inserted, {} skipped, {} failed, {} unconfirmed, {} not attempted.",
                    report.slots,
                    report.already_registered,
                    batch.inserted.len(),
                    batch.skipped.len(),
                    batch.failed.len(),
                    batch.unconfirmed.len(),
                    batch.not_attempted.len()
                );
            }
            match &report.batch.error {
                None => Ok(0),
                Some(reason) => {
                    println!("Populate stopped early: {reason}");
                    Ok(2)
                }
            }
        }
    }
}

async fn run(args: &ArgMatches) -> Result<u8, Error> {
    let Some((command, sub_args)) = args.subcommand() else {
        return Ok(1); // Subcommand is required.
    };
    let rocket = votesheet_backend::build().ignite().await?;
    let stores = rocket.state::<Stores>().ok_or(Error::NoStores)?;
    info!("Running {command}");
    execute(stores, command, sub_args).await
}

#[rocket::main]
async fn main() {
    if let Err(err) = log4rs::init_file("log4rs.yaml", log4rs_dynamic_filters::default_deserializers()) {
        eprintln!("Logging disabled: {err}");
    }

    let args = cli().get_matches();
    let exit_code = match run(&args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            println!("Error: {err}");
            1
        }
    };
    std::process::exit(exit_code.into())
}
