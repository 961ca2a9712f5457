//! Integration tests for the DMG server/client rendezvous.

use async_trait::async_trait;
use gridstitch::args::JobArgs;
use gridstitch::config::Config;
use gridstitch::dmg::{BandsProcessor, DmgAttrs};
use gridstitch::job::{Job, JobMonitor, OutputStream, Processor, SchedulerError};
use std::sync::Arc;
use tokio::sync::Mutex;

const SERVER_OUTPUT: &[u8] = b"warming up\nServer Address: 10.0.0.4:11001\n";

/// A started job observed by the recording processor.
#[derive(Debug, Clone)]
struct StartedJob {
    name: String,
    executable: String,
    argv: Vec<String>,
}

/// Records every started job; "server" jobs reply with a scripted stdout.
struct RecordingProcessor {
    started: Mutex<Vec<StartedJob>>,
}

impl RecordingProcessor {
    fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
        }
    }
}

struct ScriptedMonitor {
    output: Option<Vec<u8>>,
}

#[async_trait]
impl JobMonitor for ScriptedMonitor {
    async fn stdout(&mut self) -> Result<OutputStream, SchedulerError> {
        match self.output.take() {
            Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            None => Err(SchedulerError::OutputUnavailable("stdout")),
        }
    }

    async fn wait(&mut self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let argv = job.command_line()?;
        let is_server = job.name.ends_with("-Server");
        self.started.lock().await.push(StartedJob {
            name: job.name.clone(),
            executable: job.executable.clone(),
            argv,
        });
        Ok(Box::new(ScriptedMonitor {
            output: is_server.then(|| SERVER_OUTPUT.to_vec()),
        }))
    }
}

fn dmg_resources() -> Config {
    let mut cfg = Config::default();
    cfg.insert("dmgServer", serde_json::json!("/opt/dmg/dmg_server"));
    cfg.insert("dmgClient", serde_json::json!("/opt/dmg/dmg_client"));
    cfg.insert("maxRunningJobs", serde_json::json!(4));
    cfg.insert("jobQueueSize", serde_json::json!(4));
    cfg
}

fn dmg_job(configure: impl FnOnce(&mut JobArgs)) -> Job {
    let mut args = JobArgs::new(Arc::new(DmgAttrs::registry()));
    configure(&mut args);
    Job {
        name: "stitch".into(),
        executable: String::new(),
        args,
        builder: None,
    }
}

#[tokio::test]
async fn test_single_image_rendezvous() {
    let inner = Arc::new(RecordingProcessor::new());
    let processor = BandsProcessor::new(inner.clone(), dmg_resources());

    let job = dmg_job(|args| {
        args.set_string("pixels", "/data/p.iGrid");
        args.set_string("labels", "/data/l.iGrid");
        args.set_string("out", "/data/o.iGrid");
    });
    processor.run(job).await.unwrap();

    let started = inner.started.lock().await;
    assert_eq!(started.len(), 2);

    let server = &started[0];
    assert_eq!(server.name, "stitch-Server");
    assert_eq!(server.executable, "/opt/dmg/dmg_server");

    // The client received the address scraped from the server's stdout.
    let client = &started[1];
    assert_eq!(client.name, "stitch-Client_0");
    assert_eq!(client.executable, "/opt/dmg/dmg_client");
    let address_at = client.argv.iter().position(|t| t == "--address").unwrap();
    assert_eq!(client.argv[address_at + 1], "10.0.0.4:11001");
}

#[tokio::test]
async fn test_band_list_fans_out_one_client_per_band() {
    let inner = Arc::new(RecordingProcessor::new());
    let processor = BandsProcessor::new(inner.clone(), dmg_resources());

    let job = dmg_job(|args| {
        args.set_int("sections", 3);
        args.set_string_list("pixelsList", vec!["p0".into(), "p1".into(), "p2".into()]);
        args.set_string_list("labelsList", vec!["l0".into(), "l1".into(), "l2".into()]);
        args.set_string_list("outList", vec!["o0".into(), "o1".into(), "o2".into()]);
    });
    processor.run(job).await.unwrap();

    let started = inner.started.lock().await;
    // One server plus three clients.
    assert_eq!(started.len(), 4);
    assert_eq!(started[0].name, "stitch-Server");

    let mut client_names: Vec<_> = started[1..].iter().map(|j| j.name.clone()).collect();
    client_names.sort();
    assert_eq!(
        client_names,
        vec!["stitch-Client_0", "stitch-Client_1", "stitch-Client_2"]
    );
    for client in &started[1..] {
        let address_at = client.argv.iter().position(|t| t == "--address").unwrap();
        assert_eq!(client.argv[address_at + 1], "10.0.0.4:11001");
    }
}

#[tokio::test]
async fn test_preconfigured_address_skips_the_scan() {
    let inner = Arc::new(RecordingProcessor::new());
    let processor = BandsProcessor::new(inner.clone(), dmg_resources());

    let job = dmg_job(|args| {
        args.set_string("serverAddress", "stitch-host:9000");
        args.set_string("pixels", "/data/p.iGrid");
        args.set_string("labels", "/data/l.iGrid");
        args.set_string("out", "/data/o.iGrid");
    });
    processor.run(job).await.unwrap();

    let started = inner.started.lock().await;
    let client = &started[1];
    let address_at = client.argv.iter().position(|t| t == "--address").unwrap();
    assert_eq!(client.argv[address_at + 1], "stitch-host:9000");
}

#[tokio::test]
async fn test_validation_refuses_to_start_anything() {
    let inner = Arc::new(RecordingProcessor::new());
    let processor = BandsProcessor::new(inner.clone(), dmg_resources());

    // labelsList is missing one entry.
    let job = dmg_job(|args| {
        args.set_int("sections", 2);
        args.set_string_list("pixelsList", vec!["p0".into(), "p1".into()]);
        args.set_string_list("labelsList", vec!["l0".into()]);
        args.set_string_list("outList", vec!["o0".into(), "o1".into()]);
    });
    let err = processor.run(job).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Validation(_)));
    assert!(inner.started.lock().await.is_empty());
}
