//! Command handlers.

use serde::Serialize;
use std::net::SocketAddr;
use tracing::{info, warn};

use semvec_core::{Error, Result};
use semvec_pipeline::PipelineSpec;
use semvec_reprocess::{JobId, JobRequest, ReprocessJob, Reprocessor};
use semvec_search::{SearchQuery, SearchRequest};

use crate::app::Services;
use crate::cli::{JobsAction, PipelineAction, ReprocessArgs, SchemaAction, SearchArgs};
use crate::config::SemvecConfig;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the HTTP API until Ctrl-C.
pub async fn serve(
    config: &SemvecConfig,
    services: &Services,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::config(format!("invalid bind address {host}:{port}: {e}")))?;

    semvec_api::serve(services.api_state(), addr, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
    })
    .await
}

/// `semvec pipeline ...`
pub async fn pipeline(services: &Services, action: PipelineAction) -> Result<()> {
    let registry = &services.registry;
    match action {
        PipelineAction::Register {
            field,
            compose,
            dimension,
        } => {
            let definition = registry
                .register(PipelineSpec::new(field, compose, dimension))
                .await?;
            print_json(&definition)
        }
        PipelineAction::Activate { field, version } => {
            print_json(&registry.activate(&field, version).await?)
        }
        PipelineAction::Show { field, version } => {
            print_json(&registry.resolve(&field, version).await?)
        }
        PipelineAction::List { field: Some(field) } => {
            print_json(&registry.versions(&field).await?)
        }
        PipelineAction::List { field: None } => print_json(&registry.fields().await),
    }
}

/// `semvec schema ...`
pub async fn schema(services: &Services, action: SchemaAction) -> Result<()> {
    match action {
        SchemaAction::Declare { field } => {
            let definition = services.registry.current(&field).await?;
            let schema = definition.schema();
            services.storage.declare_vector_field(&schema).await?;
            info!(
                "Declared vector field {} ({} dimensions)",
                schema.field, schema.dimension
            );
            print_json(&schema)
        }
    }
}

/// `semvec reprocess ...`: run a job to completion, cancelling on Ctrl-C.
pub async fn reprocess(services: &Services, args: ReprocessArgs) -> Result<()> {
    let mut request = JobRequest::new(args.field);
    if let Some(version) = args.version {
        request = request.with_version(version);
    }
    if let Some(batch_size) = args.batch_size {
        request = request.with_batch_size(batch_size);
    }
    if let Some(slices) = args.slices {
        request = request.with_slices(slices);
    }
    if args.stale_only {
        request = request.stale_only();
    }

    let job = services.reprocessor.submit(request).await?;
    info!("Job {} running; Ctrl-C cancels at the next batch", job.id);
    let job = wait_or_cancel(&services.reprocessor, &job.id).await?;
    print_json(&job)
}

async fn wait_or_cancel(reprocessor: &Reprocessor, id: &JobId) -> Result<ReprocessJob> {
    tokio::select! {
        job = reprocessor.wait(id) => job,
        _ = tokio::signal::ctrl_c() => {
            warn!("Cancelling job {}", id);
            reprocessor.cancel(id).await?;
            reprocessor.wait(id).await
        }
    }
}

/// `semvec jobs ...`
pub async fn jobs(services: &Services, action: JobsAction) -> Result<()> {
    let reprocessor = &services.reprocessor;
    match action {
        JobsAction::List => print_json(&reprocessor.list().await?),
        JobsAction::Status { id } => print_json(&reprocessor.status(&id.parse()?).await?),
        JobsAction::Resume { id } => {
            let id: JobId = id.parse()?;
            reprocessor.resume(&id).await?;
            print_json(&wait_or_cancel(reprocessor, &id).await?)
        }
        JobsAction::Clear { id } => {
            let id: JobId = id.parse()?;
            reprocessor.clear(&id).await?;
            println!("Cleared job {id}");
            Ok(())
        }
    }
}

/// `semvec search ...`
pub async fn search(services: &Services, args: SearchArgs) -> Result<()> {
    let query = match (args.text, args.vector) {
        (Some(text), None) => SearchQuery::Text(text),
        (None, Some(vector)) => SearchQuery::Vector(vector),
        _ => return Err(Error::validation("give exactly one of --text or --vector")),
    };
    let request = SearchRequest {
        output_field: args.field,
        query,
        k: args.k,
        candidates: args.candidates,
        fields: args.fields,
        version: None,
    };
    print_json(&services.gateway.search(request).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::{CliArgs, Command};
    use crate::config::StateConfig;
    use clap::Parser;
    use semvec_core::Record;

    async fn services(dir: &tempfile::TempDir) -> Services {
        let config = SemvecConfig {
            state: StateConfig {
                dir: Some(dir.path().to_string_lossy().into_owned()),
            },
            ..Default::default()
        };
        Services::build(&config).await.unwrap()
    }

    fn parse(args: &[&str]) -> Command {
        CliArgs::parse_from(args).command
    }

    #[tokio::test]
    async fn test_register_declare_reprocess_search() {
        let dir = tempfile::TempDir::new().unwrap();
        let services = services(&dir).await;

        let Command::Pipeline(action) = parse(&[
            "semvec", "pipeline", "register", "-f", "vector", "--compose", "message", "-d", "8",
        ]) else {
            unreachable!()
        };
        pipeline(&services, action).await.unwrap();

        let Command::Schema(action) = parse(&["semvec", "schema", "declare", "-f", "vector"]) else {
            unreachable!()
        };
        schema(&services, action).await.unwrap();

        for (id, message) in [("a", "enrich start"), ("b", "payment failed")] {
            services
                .storage
                .put_record(&Record::new(id).with_attribute("message", message))
                .await
                .unwrap();
        }

        let Command::Reprocess(args) =
            parse(&["semvec", "reprocess", "-f", "vector", "--slices", "2"])
        else {
            unreachable!()
        };
        reprocess(&services, args).await.unwrap();
        let job = &services.reprocessor.list().await.unwrap()[0];
        assert_eq!(job.status, semvec_reprocess::JobStatus::Completed);
        assert_eq!(job.totals().updated, 2);

        let Command::Search(args) =
            parse(&["semvec", "search", "-f", "vector", "--text", "payment failed", "-k", "1"])
        else {
            unreachable!()
        };
        search(&services, args).await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let services = services(&dir).await;
            services
                .registry
                .register(PipelineSpec::new("vector", ["message"], 8))
                .await
                .unwrap();
        }
        let services = services(&dir).await;
        assert_eq!(services.registry.current("vector").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_jobs_with_bad_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let services = services(&dir).await;
        let result = jobs(
            &services,
            JobsAction::Status {
                id: "nope".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
