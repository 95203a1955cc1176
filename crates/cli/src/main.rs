use anyhow::Result;
use cfi_audit::commands::{
    analyze_command, init_project_command, list_backends_command, list_binaries_command,
    project_info_command, scan_command, show_binary_command, summary_command, AnalyzeOptions,
    OutputFormat, ScanOptions,
};
use cfi_audit_core::analysis::DetectionMode;
use clap::{Parser, Subcommand};

/// Control-flow-integrity and shadow-call-stack auditing for extracted system images.
///
/// This CLI is a thin wrapper around `cfi-audit-core`; detectors, storage and
/// CFG providers all live in the library.
#[derive(Parser, Debug)]
#[command(
    name = "cfi-audit",
    version,
    about = "Detect CFI and shadow-call-stack hardening in binaries",
    long_about = None
)]
struct Cli {
    /// Show debug logging on stderr. `RUST_LOG` overrides.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new audit project at the given root.
    ///
    /// This will:
    /// - Create a `.cfi` metadata directory with `project.json` and `results.db`.
    /// - Create `reports` and `reports/evidence` directories.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show basic information about an existing project.
    ProjectInfo {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a single binary and print its hardening verdicts.
    Analyze {
        /// Project root directory. A project is only required with `--save` or `--dump`.
        #[arg(long, default_value = ".")]
        root: String,

        /// Binary to analyze (relative paths resolve against the root).
        #[arg(long)]
        path: String,

        /// Detection mode: standard, only-multi-module or all-forward-edge.
        #[arg(long, default_value = "standard")]
        mode: DetectionMode,

        /// CFG provider; defaults to the project setting or the build default.
        #[arg(long)]
        backend: Option<String>,

        /// CFG generation budget in seconds; 0 disables the watchdog.
        #[arg(long)]
        timeout: Option<u64>,

        /// Subimage label used for the binary's identity.
        #[arg(long, default_value = "adhoc")]
        subimage: String,

        /// Container file the binary was unpacked from.
        #[arg(long, default_value = "")]
        container: String,

        /// Record the result in the project database.
        #[arg(long, default_value_t = false)]
        save: bool,

        /// Write the matched instructions to `reports/evidence/`.
        #[arg(long, default_value_t = false)]
        dump: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Scan an extracted filesystem tree and record every ELF binary.
    Scan {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Directory holding the mounted or extracted image.
        #[arg(long)]
        tree: String,

        /// Distribution or build the image belongs to (e.g. `android-14`).
        #[arg(long)]
        release: String,

        /// Image name within the version (e.g. `system`, `vendor`).
        #[arg(long)]
        image: String,

        /// Container file (package, APEX, ...) the tree was unpacked from.
        #[arg(long)]
        container: Option<String>,

        /// Container type recorded with `--container`.
        #[arg(long, default_value = "archive")]
        container_type: String,

        /// Path of the container inside the image; defaults to its name.
        #[arg(long)]
        container_path: Option<String>,

        /// Linux distribution rules for re-analysis with `--ignore-unsafe`.
        #[arg(long, default_value_t = false)]
        linux: bool,

        /// Also analyze binaries not attributed to a memory-unsafe language.
        #[arg(long, default_value_t = false)]
        ignore_unsafe: bool,

        /// Re-analyze binaries already present in the database.
        #[arg(long, default_value_t = false)]
        skip_db_check: bool,

        /// Detection mode: standard, only-multi-module or all-forward-edge.
        #[arg(long, default_value = "standard")]
        mode: DetectionMode,

        /// Worker threads; defaults to the project setting or one per core.
        #[arg(long)]
        jobs: Option<usize>,

        /// CFG provider; defaults to the project setting or the build default.
        #[arg(long)]
        backend: Option<String>,

        /// CFG generation budget in seconds; 0 disables the watchdog.
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip propagating multi-module CFI from lib64 to lib.
        #[arg(long, default_value_t = false)]
        no_lib32: bool,

        /// Report format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the JSON/YAML report to this file instead of stdout.
        #[arg(long)]
        output: Option<String>,
    },

    /// List analyzed binaries.
    ListBinaries {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Restrict to one subimage (`version/image`).
        #[arg(long)]
        subimage: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show one stored binary and the evidence behind its verdicts.
    ShowBinary {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Binary identity as printed by `list-binaries --json`.
        #[arg(long)]
        id: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Hardening counts for all subimages under a prefix.
    Summary {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Subimage prefix, usually a version. Empty matches everything.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List CFG providers compiled into this binary.
    Backends {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new()
        .filter_module("cfi_audit_core", level)
        .filter_module("cfi_audit", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::InitProject { root, name } => init_project_command(&root, name)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::Analyze {
            root,
            path,
            mode,
            backend,
            timeout,
            subimage,
            container,
            save,
            dump,
            json,
        } => {
            let opts = AnalyzeOptions {
                root,
                path,
                mode,
                backend,
                timeout_secs: timeout,
                subimage,
                container,
                save,
                dump,
                json,
            };
            analyze_command(&opts)?
        }
        Command::Scan {
            root,
            tree,
            release,
            image,
            container,
            container_type,
            container_path,
            linux,
            ignore_unsafe,
            skip_db_check,
            mode,
            jobs,
            backend,
            timeout,
            no_lib32,
            format,
            output,
        } => {
            let opts = ScanOptions {
                root,
                tree,
                version: release,
                image,
                container,
                container_type,
                container_path,
                linux,
                ignore_unsafe,
                skip_db_check,
                mode,
                jobs,
                backend,
                timeout_secs: timeout,
                no_lib32,
                format,
                output,
            };
            scan_command(&opts)?
        }
        Command::ListBinaries { root, subimage, json } => {
            list_binaries_command(&root, subimage.as_deref(), json)?
        }
        Command::ShowBinary { root, id, json } => show_binary_command(&root, &id, json)?,
        Command::Summary { root, prefix, json } => summary_command(&root, &prefix, json)?,
        Command::Backends { json } => list_backends_command(json)?,
    }

    Ok(())
}
