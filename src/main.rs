//! dcmanifest - Distributed-class manifest tool
//!
//! Computes schema hashes, generates and checks symbol manifests, and runs
//! the schema compatibility handshake.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dcmanifest::config::{self, Config};
use dcmanifest::manifest::{read_manifest, to_toml_string, write_manifest};
use dcmanifest::network::{Client, Server, ServerEvent};
use dcmanifest::schema::compile_files;
use dcmanifest::{
    ClassCatalog, ClassRegistry, ManifestLoader, ManifestOrigin, Role, SymbolManifest,
};

/// dcmanifest - Distributed-class manifest tool
#[derive(Parser)]
#[command(name = "dcmanifest")]
#[command(version = "0.1.0")]
#[command(about = "Compile distributed-class schemas into hashed symbol manifests", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema hash
    Hash {
        /// Schema files, in load order (default: from config)
        schema: Vec<PathBuf>,
    },

    /// Print the symbol manifest for a role
    Show {
        schema: Vec<PathBuf>,

        /// Process role (client, ai, uberdog)
        #[arg(short, long)]
        role: Option<Role>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the generated manifest file
    Generate {
        schema: Vec<PathBuf>,

        #[arg(short, long)]
        role: Option<Role>,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fail if a generated manifest no longer matches the schema
    Check {
        /// Generated manifest to verify
        #[arg(short, long)]
        manifest: PathBuf,

        schema: Vec<PathBuf>,
    },

    /// Load the registry and accept peers with the same schema
    Serve {
        schema: Vec<PathBuf>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Load the registry and handshake with a server
    Connect {
        /// Server address (host:port or host)
        #[arg(short, long)]
        server: String,

        schema: Vec<PathBuf>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(&config.general.log_level)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Hash { schema } => {
            let files = schema_files(&config, schema)?;
            let compiled = compile_files(&files)?;
            println!("{}", compiled.hash());
        }
        Commands::Show { schema, role, json } => {
            let files = schema_files(&config, schema)?;
            let role = role.unwrap_or(config.schema.role);
            let manifest = compile_files(&files)?.manifest(role);
            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                print_manifest(&manifest);
            }
        }
        Commands::Generate {
            schema,
            role,
            output,
        } => {
            let files = schema_files(&config, schema)?;
            let role = role.unwrap_or(config.schema.role);
            let manifest = compile_files(&files)?.manifest(role);
            if let Some(path) = output {
                write_manifest(&manifest, &path)?;
                println!("Manifest written to: {}", path.display());
            } else {
                print!("{}", to_toml_string(&manifest)?);
            }
        }
        Commands::Check { manifest, schema } => {
            let files = schema_files(&config, schema)?;
            check_manifest(&manifest, &files)?;
        }
        Commands::Serve { schema, port, role } => {
            let files = schema_files(&config, schema)?;
            let role = role.unwrap_or(config.schema.role);
            let port = port.unwrap_or(config.network.port);
            run_server(&config, &files, role, port).await?;
        }
        Commands::Connect {
            server,
            schema,
            port,
            role,
        } => {
            let files = schema_files(&config, schema)?;
            let role = role.unwrap_or(config.schema.role);
            let port = port.unwrap_or(config.network.port);
            run_client(&config, &files, role, &server, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Schema files from the command line, falling back to the configuration
fn schema_files(config: &Config, from_cli: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    let files = if from_cli.is_empty() {
        config.schema.files.clone()
    } else {
        from_cli
    };

    if files.is_empty() {
        anyhow::bail!("No schema files given. Pass them as arguments or set [schema] files in the config.");
    }
    Ok(files)
}

fn print_manifest(manifest: &SymbolManifest) {
    println!("Schema hash: {}", manifest.hash());
    println!("Role: {}", manifest.role());
    println!("Symbols: {}\n", manifest.len());

    for entry in manifest.entries() {
        let view = if entry.primary { "" } else { " (view)" };
        println!(
            "{:>5}  {:<32} {}{}",
            entry.class_id.0, entry.module_path, entry.name, view
        );
    }
}

fn check_manifest(path: &Path, files: &[PathBuf]) -> anyhow::Result<()> {
    let generated = read_manifest(path)?;
    let schema = compile_files(files)?;

    if generated.hash() != schema.hash() {
        anyhow::bail!(
            "{} is stale: generated from schema hash {}, schema is now {}",
            path.display(),
            generated.hash(),
            schema.hash()
        );
    }
    if generated != schema.manifest(generated.role()) {
        anyhow::bail!(
            "{} does not match the {} manifest of schema {}",
            path.display(),
            generated.role(),
            schema.hash()
        );
    }

    println!("{} is up to date (hash {})", path.display(), schema.hash());
    Ok(())
}

/// Resolve the manifest and build the class registry for this process
fn load_registry(config: &Config, files: &[PathBuf], role: Role) -> anyhow::Result<ClassRegistry> {
    let schema = compile_files(files)?;
    let catalog = ClassCatalog::from_schema(&schema, role);

    let origin = match &config.schema.manifest {
        Some(path) => ManifestOrigin::Generated {
            path: path.clone(),
            verify_against: Some(files.to_vec()),
        },
        None => ManifestOrigin::Schema(files.to_vec()),
    };

    let snapshot = ManifestLoader::new(origin, &catalog)
        .with_role(role)
        .with_duplicate_policy(config.schema.duplicate_policy)
        .load()?;

    Ok(ClassRegistry::build(snapshot)?)
}

async fn run_server(config: &Config, files: &[PathBuf], role: Role, port: u16) -> anyhow::Result<()> {
    let registry = Arc::new(load_registry(config, files, role)?);
    let local = config.peer_info(role);

    let mut server = Server::new(
        config.network.to_runtime(port),
        local.clone(),
        registry.schema_hash(),
    );
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let bind_addr = server.start().await?;

    println!("\n========================================");
    println!("  dcmanifest Server Running");
    println!("========================================");
    println!("  Name: {}", local.name);
    println!("  Role: {}", role);
    println!("  Address: {}", bind_addr);
    println!("  Schema hash: {}", registry.schema_hash());
    println!("  Classes: {} ({} symbols)", registry.class_count(), registry.len());
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::PeerAccepted { addr, peer } => {
                        println!("+ {} ({}, {}) accepted", peer.name, peer.role, addr);
                    }
                    ServerEvent::PeerRejected { addr, reason } => {
                        println!("! {} rejected: {}", addr, reason);
                    }
                    ServerEvent::PeerDisconnected { addr, reason } => {
                        println!("- {} disconnected: {}", addr, reason);
                    }
                    ServerEvent::Started { .. } | ServerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn run_client(
    config: &Config,
    files: &[PathBuf],
    role: Role,
    server: &str,
    port: u16,
) -> anyhow::Result<()> {
    let registry = load_registry(config, files, role)?;

    let server_addr: SocketAddr = if server.contains(':') {
        server.parse()?
    } else {
        format!("{}:{}", server, port).parse()?
    };

    let client = Client::new(
        config.network.to_runtime(port),
        config.peer_info(role),
        registry.schema_hash(),
    );

    println!("Connecting to {} (schema hash {})...", server_addr, registry.schema_hash());
    let remote = client.connect(server_addr).await?;
    println!("Schemas match: {} ({}) accepted us", remote.name, remote.role);

    let rtt = client.ping().await?;
    println!("Round trip: {:?}", rtt);

    client.disconnect().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["dcmanifest", "hash", "a.dc", "b.dc"]).unwrap();
        match cli.command {
            Commands::Hash { schema } => assert_eq!(schema.len(), 2),
            _ => panic!("expected hash command"),
        }

        let cli = Cli::try_parse_from(["dcmanifest", "show", "--role", "ai", "game.dc"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { role: Some(Role::Ai), .. }));

        assert!(Cli::try_parse_from(["dcmanifest", "show", "--role", "server"]).is_err());
    }

    #[test]
    fn test_schema_files_fallback() {
        let mut config = Config::default();
        assert!(schema_files(&config, Vec::new()).is_err());

        config.schema.files = vec![PathBuf::from("otp.dc")];
        assert_eq!(schema_files(&config, Vec::new()).unwrap().len(), 1);
        assert_eq!(
            schema_files(&config, vec![PathBuf::from("a.dc"), PathBuf::from("b.dc")])
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_check_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let schema_path = dir.path().join("game.dc");
        std::fs::write(&schema_path, "from pkg import Foo/AI\ndclass Foo { setA(int8); };\n").unwrap();
        let files = vec![schema_path.clone()];

        let manifest_path = dir.path().join("ai.toml");
        let manifest = compile_files(&files).unwrap().manifest(Role::Ai);
        write_manifest(&manifest, &manifest_path).unwrap();
        assert!(check_manifest(&manifest_path, &files).is_ok());

        std::fs::write(&schema_path, "from pkg import Foo/AI\ndclass Foo { setA(int16); };\n").unwrap();
        assert!(check_manifest(&manifest_path, &files).is_err());
    }

    #[test]
    fn test_load_registry() {
        let dir = tempfile::TempDir::new().unwrap();
        let schema_path = dir.path().join("game.dc");
        std::fs::write(&schema_path, "from pkg import Foo/AI/OV\ndclass Foo { setA(int8); };\n").unwrap();

        let registry = load_registry(&Config::default(), &[schema_path], Role::Client).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.class_count(), 1);
    }
}
