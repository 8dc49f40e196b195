use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use std::process;

use repsync::config::{ServerConfig, SyncGroup};
use repsync::connection::Location;
use repsync::error::SyncError;
use repsync::protocol::client::Client;
use repsync::protocol::server::Server;
use repsync::sync::{sync_group, SyncOptions};

fn cli() -> Command {
	Command::new("repsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Conflict-aware repository directory synchronizer")
		.arg(
			Arg::new("group")
				.value_name("FILE")
				.help("Sync-group descriptor; a bare file argument runs 'sync'"),
		)
		.arg(
			Arg::new("dry-run")
				.long("dry-run")
				.action(ArgAction::SetTrue)
				.help("Plan and report without applying anything"),
		)
		.arg(
			Arg::new("no-checksum")
				.long("no-checksum")
				.action(ArgAction::SetTrue)
				.help("Classify by timestamp alone, skip content hashing"),
		)
		.subcommand(
			Command::new("create")
				.about("Create a new sync-group descriptor")
				.arg(Arg::new("name").required(true))
				.arg(Arg::new("file").required(true)),
		)
		.subcommand(
			Command::new("add")
				.about("Add a location to a sync group (first one is the repository)")
				.arg(Arg::new("file").required(true))
				.arg(Arg::new("url").required(true)),
		)
		.subcommand(
			Command::new("rm")
				.about("Remove a location from a sync group")
				.arg(Arg::new("file").required(true))
				.arg(Arg::new("url").required(true)),
		)
		.subcommand(
			Command::new("sync")
				.about("Reconcile the group and apply the resolved operations")
				.arg(Arg::new("file").required(true))
				.arg(Arg::new("dry-run").long("dry-run").action(ArgAction::SetTrue))
				.arg(Arg::new("no-checksum").long("no-checksum").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("serve")
				.about("Run the protocol server")
				.arg(Arg::new("config").required(true)),
		)
		.subcommand(
			Command::new("repos")
				.about("List repositories offered by a remote server")
				.arg(Arg::new("url").required(true)),
		)
}

#[tokio::main]
async fn main() {
	repsync::logging::init_tracing();

	let mut cmd = cli();
	let matches = cmd.clone().get_matches();

	let result = match matches.subcommand() {
		Some(("create", sub)) => cmd_create(sub),
		Some(("add", sub)) => cmd_modify(sub, true),
		Some(("rm", sub)) => cmd_modify(sub, false),
		Some(("sync", sub)) => {
			cmd_sync(
				sub.get_one::<String>("file").expect("required"),
				sub.get_flag("dry-run"),
				sub.get_flag("no-checksum"),
			)
			.await
		}
		Some(("serve", sub)) => cmd_serve(sub).await,
		Some(("repos", sub)) => cmd_repos(sub).await,
		_ => match matches.get_one::<String>("group") {
			// Default mode is sync
			Some(file) => {
				cmd_sync(file, matches.get_flag("dry-run"), matches.get_flag("no-checksum"))
					.await
			}
			None => {
				let _ = cmd.print_help();
				println!();
				process::exit(2);
			}
		},
	};

	if let Err(e) = result {
		eprintln!("repsync: {}", e);
		process::exit(1);
	}
}

fn cmd_create(matches: &ArgMatches) -> Result<(), SyncError> {
	let name = matches.get_one::<String>("name").expect("required");
	let file = matches.get_one::<String>("file").expect("required");
	let path = Path::new(file);

	if path.exists() {
		return Err(SyncError::Format { message: format!("{} already exists", file) });
	}
	SyncGroup::new(name).save(path)?;
	println!("created sync group '{}' in {}", name, file);
	Ok(())
}

fn cmd_modify(matches: &ArgMatches, add: bool) -> Result<(), SyncError> {
	let file = matches.get_one::<String>("file").expect("required");
	let url = matches.get_one::<String>("url").expect("required");
	let path = Path::new(file);

	let mut group = SyncGroup::load(path)?;
	if add {
		// Validate remote URLs before persisting them
		Location::parse(url)?;
		if group.add_location(url)? {
			group.save(path)?;
			println!("added {}", url);
		} else {
			println!("{} is already part of the group", url);
		}
	} else if group.remove_location(url) {
		group.save(path)?;
		println!("removed {}", url);
	} else {
		println!("{} is not part of the group", url);
	}
	Ok(())
}

async fn cmd_sync(file: &str, dry_run: bool, no_checksum: bool) -> Result<(), SyncError> {
	let group = SyncGroup::load(Path::new(file))?;
	let opts = SyncOptions { dry_run, hashing: !no_checksum, ..SyncOptions::default() };

	let outcomes = sync_group(&group, &opts).await?;
	for outcome in &outcomes {
		if let Some(message) = &outcome.aborted {
			eprintln!("{}: pass aborted: {}", outcome.source, message);
			continue;
		}
		println!(
			"{}: {} in, {} out, {} deleted here, {} deleted there",
			outcome.source,
			outcome.copied_to_repo,
			outcome.copied_to_source,
			outcome.deleted_in_repo,
			outcome.deleted_on_source
		);
		for (path, status) in &outcome.conflicts {
			println!("  conflict {}: {} (decide manually)", path, status);
		}
		for (path, message) in &outcome.failures {
			println!("  failed {}: {}", path, message);
		}
	}
	Ok(())
}

async fn cmd_serve(matches: &ArgMatches) -> Result<(), SyncError> {
	let config = matches.get_one::<String>("config").expect("required");
	let config = ServerConfig::load(Path::new(config))?;
	Server::new(config).run().await
}

async fn cmd_repos(matches: &ArgMatches) -> Result<(), SyncError> {
	let url = matches.get_one::<String>("url").expect("required");

	// A bare server URL (no repository path) is fine here; pad it so the
	// location parser accepts it
	let mut padded = url.trim_end_matches('/').to_string();
	if padded.strip_prefix("sync://").map(|rest| !rest.contains('/')).unwrap_or(false) {
		padded.push_str("/-");
	}
	let (host, port, username, password) = match Location::parse(&padded)? {
		Location::Remote { host, port, username, password, .. } => {
			(host, port, username, password)
		}
		Location::Local { .. } => {
			return Err(SyncError::Format {
				message: format!("'{}' is not a sync:// URL", url),
			});
		}
	};

	let mut client = Client::connect(&format!("{}:{}", host, port)).await?;
	let info = client.hello().await?;
	println!("{} ({}) protocol {}.{}", info.name, info.description, info.major, info.minor);
	client.auth(&username, &password).await?;
	for name in client.list_repos().await? {
		println!("{}", name);
	}
	Ok(())
}

// vim: ts=4
