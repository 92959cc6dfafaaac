// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use clap::Parser;
use kube::CustomResourceExt;
use namespace_class_controller::config::{Cli, Command};
use namespace_class_controller::namespaceclass_types::NamespaceClass;
use namespace_class_controller::shim_layer::run_controller;
use tracing::*;
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Export => {
            info!("exporting custom resource definition");
            println!("{}", serde_yaml::to_string(&NamespaceClass::crd())?);
        }
        Command::Run(args) => {
            info!("running namespace-class-controller");
            run_controller(args.engine_config(), args.runtime_config()).await?;
        }
    }
    Ok(())
}
