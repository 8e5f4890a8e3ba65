use crate::{
    config::{LauncherConfig, LauncherPaths},
    launcher::{Frontend, GroupView, Launcher, VersionsOfType},
    logging,
    report::{Report, ReportKind},
    version::Architecture,
};
use anyhow::{bail, Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Groups,
    Versions {
        refresh: bool,
    },
    Create {
        name: String,
        version: String,
        group: String,
    },
    Copy {
        dirname: String,
        worlds: bool,
    },
    Rename {
        dirname: String,
        name: String,
    },
    SetVersion {
        dirname: String,
        version: String,
    },
    SetArch {
        dirname: String,
        architecture: Architecture,
    },
    Move {
        dirnames: Vec<String>,
        group: String,
        position: Option<usize>,
    },
    GroupRename {
        old: String,
        new: String,
    },
    GroupToggle(String),
    GroupDelete(String),
    Launch(String),
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (format, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("NickelLauncher v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let paths = LauncherPaths::discover()?;
            paths.ensure()?;
            let config = LauncherConfig::load_or_create(&paths)?;
            let log = logging::init(&paths.logs, config.log_level.as_deref())?;
            info!(
                "NickelLauncher v{} started, logging to {}",
                env!("CARGO_PKG_VERSION"),
                log.display()
            );
            let frontend = Arc::new(ConsoleFrontend { format });
            let launcher = Launcher::open(paths, &config, frontend)?;
            run_command(&launcher, command, format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(OutputFormat, CliCommand)> {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if arg == "--format" {
            let value = iter.next().context("--format requires a value")?;
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        tokens.push(arg.as_str());
    }

    let Some((head, rest)) = tokens.split_first() else {
        return Ok((format, CliCommand::Help));
    };
    let command = match *head {
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        "groups" => CliCommand::Groups,
        "versions" => CliCommand::Versions {
            refresh: rest.contains(&"--refresh"),
        },
        "create" => {
            let options = Options::parse(rest, &["--version", "--group"])?;
            CliCommand::Create {
                name: options.positional(0, "create requires a name")?,
                version: options.required("--version")?,
                group: options.value("--group").unwrap_or_default(),
            }
        }
        "copy" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::Copy {
                dirname: options.positional(0, "copy requires an instance")?,
                worlds: options.switch("--worlds"),
            }
        }
        "rename" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::Rename {
                dirname: options.positional(0, "rename requires an instance")?,
                name: options.positional(1, "rename requires a new name")?,
            }
        }
        "set-version" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::SetVersion {
                dirname: options.positional(0, "set-version requires an instance")?,
                version: options.positional(1, "set-version requires a version")?,
            }
        }
        "set-arch" => {
            let options = Options::parse(rest, &[])?;
            let dirname = options.positional(0, "set-arch requires an instance")?;
            let value = options.positional(1, "set-arch requires an architecture")?;
            let architecture = Architecture::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("Unknown architecture: {value}"))?;
            CliCommand::SetArch {
                dirname,
                architecture,
            }
        }
        "move" => {
            let mut options = Options::parse(rest, &["--group", "--position"])?;
            let position = match options.value("--position") {
                Some(value) => Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid position: {value}"))?,
                ),
                None => None,
            };
            let dirnames = std::mem::take(&mut options.positionals);
            if dirnames.is_empty() {
                bail!("move requires at least one instance");
            }
            CliCommand::Move {
                dirnames,
                group: options.value("--group").unwrap_or_default(),
                position,
            }
        }
        "group-rename" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::GroupRename {
                old: options.positional(0, "group-rename requires a group")?,
                new: options.positional(1, "group-rename requires a new name")?,
            }
        }
        "group-toggle" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::GroupToggle(options.positional(0, "group-toggle requires a group")?)
        }
        "group-delete" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::GroupDelete(options.positional(0, "group-delete requires a group")?)
        }
        "launch" => {
            let options = Options::parse(rest, &[])?;
            CliCommand::Launch(options.positional(0, "launch requires an instance")?)
        }
        other => bail!("Unknown command: {other} (see 'nickel help')"),
    };
    Ok((format, command))
}

/// Positionals plus `--flag value`, `--flag=value` and bare switches.
struct Options {
    positionals: Vec<String>,
    values: Vec<(String, String)>,
    switches: Vec<String>,
}

impl Options {
    fn parse(args: &[&str], valued: &[&str]) -> Result<Self> {
        let mut options = Options {
            positionals: Vec::new(),
            values: Vec::new(),
            switches: Vec::new(),
        };
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if let Some((flag, value)) = arg.split_once('=').filter(|_| arg.starts_with("--")) {
                options.values.push((flag.to_string(), value.to_string()));
            } else if valued.contains(arg) {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("{arg} requires a value"))?;
                options.values.push((arg.to_string(), value.to_string()));
            } else if arg.starts_with("--") {
                options.switches.push(arg.to_string());
            } else {
                options.positionals.push(arg.to_string());
            }
        }
        Ok(options)
    }

    fn positional(&self, index: usize, missing: &str) -> Result<String> {
        self.positionals
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{missing}"))
    }

    fn value(&self, flag: &str) -> Option<String> {
        self.values
            .iter()
            .rev()
            .find(|(name, _)| name == flag)
            .map(|(_, value)| value.clone())
    }

    fn required(&self, flag: &str) -> Result<String> {
        self.value(flag)
            .ok_or_else(|| anyhow::anyhow!("{flag} is required"))
    }

    fn switch(&self, flag: &str) -> bool {
        self.switches.iter().any(|name| name == flag)
    }
}

fn run_command(launcher: &Launcher, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::Groups => print_groups(&launcher.instance_groups(), format),
        CliCommand::Versions { refresh } => {
            print_versions(&launcher.versions_by_type(refresh)?, format)
        }
        CliCommand::Create {
            name,
            version,
            group,
        } => {
            let id = launcher.create_instance(&name, &group, &version)?;
            done(format, &format!("Created instance {id}"), json!({ "dirname": id }))
        }
        CliCommand::Copy { dirname, worlds } => {
            let id = launcher.copy_instance(&dirname, worlds)?;
            done(format, &format!("Copied {dirname} to {id}"), json!({ "dirname": id }))
        }
        CliCommand::Rename { dirname, name } => {
            launcher.rename_instance(&dirname, &name)?;
            done(format, &format!("Renamed {dirname}"), json!({ "dirname": dirname }))
        }
        CliCommand::SetVersion { dirname, version } => {
            launcher.change_version(&dirname, &version)?;
            done(format, &format!("{dirname} now uses {version}"), json!({ "dirname": dirname }))
        }
        CliCommand::SetArch {
            dirname,
            architecture,
        } => {
            launcher.change_architecture_choice(&dirname, architecture)?;
            done(
                format,
                &format!("{dirname} now uses {architecture}"),
                json!({ "dirname": dirname }),
            )
        }
        CliCommand::Move {
            dirnames,
            group,
            position,
        } => {
            let position = position.unwrap_or_else(|| {
                launcher
                    .instance_groups()
                    .iter()
                    .find(|view| view.name == group.trim())
                    .map_or(0, |view| view.instances.len())
            });
            launcher.move_instances(position, &group, &dirnames)?;
            done(
                format,
                &format!("Moved {} instance(s) to {}", dirnames.len(), group_label(&group)),
                json!({ "group": group, "dirnames": dirnames }),
            )
        }
        CliCommand::GroupRename { old, new } => {
            launcher.rename_instance_group(&old, &new)?;
            done(format, &format!("Renamed group {old} to {new}"), json!({ "group": new }))
        }
        CliCommand::GroupToggle(name) => {
            launcher.toggle_instance_group_hidden(&name)?;
            done(format, &format!("Toggled group {name}"), json!({ "group": name }))
        }
        CliCommand::GroupDelete(name) => {
            launcher.delete_instance_group(&name)?;
            done(format, &format!("Deleted group {name}"), json!({ "group": name }))
        }
        CliCommand::Launch(dirname) => {
            launcher.start_watchdog()?;
            let result = launcher.launch_instance(&dirname);
            launcher.stop_watchdog();
            result
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn done(format: OutputFormat, text: &str, value: serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{text}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

fn group_label(name: &str) -> String {
    if name.trim().is_empty() {
        "(ungrouped)".to_string()
    } else {
        name.trim().to_string()
    }
}

fn print_groups(groups: &[GroupView], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(groups)?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("No instances.");
        return Ok(());
    }
    for group in groups {
        let hidden = if group.hidden { " (hidden)" } else { "" };
        println!("{}{hidden}", group_label(&group.name));
        for instance in &group.instances {
            println!(
                "  {:<24} {:<24} {} {}",
                instance.dirname,
                instance.name,
                instance.version.display_name,
                instance.architecture_choice
            );
        }
    }
    Ok(())
}

fn print_versions(versions: &[VersionsOfType], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(versions)?);
        return Ok(());
    }
    for group in versions {
        println!("{}:", group.kind.as_str());
        if group.versions.is_empty() {
            println!("  (none)");
        }
        for version in &group.versions {
            let architectures: Vec<&str> = version
                .available_architectures
                .iter()
                .map(|arch| arch.as_str())
                .collect();
            println!("  {:<16} {}", version.display_name, architectures.join(", "));
        }
    }
    Ok(())
}

struct ConsoleFrontend {
    format: OutputFormat,
}

impl Frontend for ConsoleFrontend {
    fn reload_everything(&self) {
        if self.format == OutputFormat::Text {
            eprintln!("Instances changed on disk, reloaded.");
        }
    }

    fn launch_report(&self, report: Report) {
        match self.format {
            OutputFormat::Text => {
                let line = match &report.details {
                    Some(details) => format!(
                        "{} {:.1}/{:.1} {}",
                        report.text(),
                        details.processed,
                        details.total,
                        details.unit
                    ),
                    None => report.text(),
                };
                match report.kind {
                    ReportKind::Progress => println!("{line}"),
                    ReportKind::Error => eprintln!("{line}"),
                }
            }
            OutputFormat::Json => {
                let value = json!({
                    "type": report.kind,
                    "text": report.text(),
                    "details": report.details,
                });
                println!("{value}");
            }
        }
    }
}

fn print_help() {
    println!("NickelLauncher v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  nickel groups                              List instance groups");
    println!("  nickel versions [--refresh]                List known versions");
    println!("  nickel create <name> --version <v> [--group <g>]");
    println!("                                             Create an instance");
    println!("  nickel copy <dirname> [--worlds]           Copy an instance");
    println!("  nickel rename <dirname> <name>             Rename an instance");
    println!("  nickel set-version <dirname> <version>     Change an instance's version");
    println!("  nickel set-arch <dirname> <x64|x86>        Change an instance's architecture");
    println!("  nickel move <dirname>... --group <g> [--position <n>]");
    println!("                                             Move instances to a group");
    println!("  nickel group-rename <old> <new>            Rename or merge a group");
    println!("  nickel group-toggle <name>                 Hide or show a group");
    println!("  nickel group-delete <name>                 Delete a group, keeping its instances");
    println!("  nickel launch <dirname>                    Launch an instance");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                       Output format");
    println!("  -h, --help                                 Show help");
    println!("  -V, --version                              Show version");
}
