use airflow_operator::crd::{base::AirflowBase, cluster::AirflowCluster};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

#[derive(Parser)]
#[command(about, author, version)]
struct Opts {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the AirflowBase and AirflowCluster CRD manifests as YAML.
    Crd,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    match opts.cmd {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&AirflowBase::crd())?);
            println!("---");
            print!("{}", serde_yaml::to_string(&AirflowCluster::crd())?);
        }
    }

    Ok(())
}
