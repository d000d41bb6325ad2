use clap::{Parser, Subcommand};
use controller_core::telemetry;
use podpause::{args::PauseArgs, namespaces::converge_namespace, pods::converge_pod, store::KubeStore};

/// Run a single pause/resume pass against the current kube context
#[derive(Parser, Debug)]
#[command(name = "podpause-cli", version)]
struct Cli {
    #[command(flatten)]
    pause: PauseArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Converge every pod of a namespace to the namespace annotations
    Namespace { name: String },
    /// Converge one pod to its own annotations
    Pod { namespace: String, name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await?;
    let cli = Cli::parse();
    let config = cli.pause.to_config();

    let client = kube::Client::try_default().await?;
    let store = KubeStore::new(client);
    match cli.command {
        Command::Namespace { name } => {
            let report = converge_namespace(&store, &config, &name).await?;
            println!("{report:#?}");
        }
        Command::Pod { namespace, name } => {
            let report = converge_pod(&store, &config, &namespace, &name).await?;
            println!("{report:#?}");
        }
    }
    Ok(())
}
