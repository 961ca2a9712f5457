//! DMG server/client orchestration.
//!
//! The flow for one image (or one set of image bands):
//!
//! 1. Validate the DMG attributes and start the server through the inner
//!    image processor (local or grid).
//! 2. Discover the server address: either it was passed in, or the server's
//!    stdout is scanned for a `Server Address: <addr>` line. The same
//!    scanner works over a live pipe and over the grid-captured output file,
//!    which only grows over time; end-of-file is therefore retried after a
//!    pause rather than treated as final.
//! 3. Fan out one client per band through a parallel processor, every client
//!    pointed at the single server.
//!
//! The server is expected to outlive any individual client, so waiting on
//! the composite treats client failures as fatal while a server error is
//! only logged.

use super::{ClientCommand, DmgAttrs, ServerCommand};
use crate::config::Config;
use crate::job::{
    Job, JobMonitor, OutputStream, ParallelProcessor, Processor, SchedulerError, Splitter,
};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Pause between checks while waiting for the server address.
const PAUSE_BETWEEN_CHECKS: Duration = Duration::from_secs(10);

/// Number of checks before the rendezvous gives up.
const MAX_CHECKS: u32 = 100;

fn server_address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Server Address: (.+)$").expect("hard-coded pattern"))
}

/// Extracts the address from a `Server Address: <addr>` line.
pub fn parse_server_address(line: &str) -> Option<String> {
    server_address_pattern()
        .captures(line.trim())
        .and_then(|caps| caps.get(1))
        .map(|addr| addr.as_str().to_string())
}

async fn scan_lines(output: &mut OutputStream) -> Result<String, SchedulerError> {
    loop {
        let mut line = String::new();
        let read = output.read_line(&mut line).await?;
        if read == 0 {
            // End of the output captured so far; more may still appear.
            tokio::time::sleep(PAUSE_BETWEEN_CHECKS).await;
            continue;
        }
        if let Some(address) = parse_server_address(&line) {
            return Ok(address);
        }
    }
}

/// Scans the server output for its address, within the rendezvous patience
/// window.
pub(crate) async fn read_server_address(
    output: &mut OutputStream,
) -> Result<String, SchedulerError> {
    let patience = PAUSE_BETWEEN_CHECKS * MAX_CHECKS;
    match tokio::time::timeout(patience, scan_lines(output)).await {
        Ok(result) => result,
        Err(_) => Err(SchedulerError::Validation(
            "timeout - could not read the server address".into(),
        )),
    }
}

/// Splits a DMG job into one subjob per image band.
///
/// With empty pixels/labels/out lists a single subjob is emitted from the
/// singleton arguments; otherwise the three lists must have the same
/// positive length and subjob `i` takes entry `i` of each, with
/// `clientIndex = i`.
pub struct BandSplitter;

#[async_trait]
impl Splitter for BandSplitter {
    async fn split(&self, job: &Job, subjobs: &mpsc::Sender<Job>) -> Result<(), SchedulerError> {
        let attrs = DmgAttrs::extract(&job.args)?;
        let n_images = attrs.pixels_list.len();
        if n_images == 0 {
            let band = band_job(job, 0, &attrs.pixels, &attrs.labels, &attrs.out)?;
            let _ = subjobs.send(band).await;
            return Ok(());
        }
        if attrs.labels_list.len() != n_images || attrs.out_list.len() != n_images {
            return Err(SchedulerError::Validation(
                "pixelsList, labelsList and outList must have the same length".into(),
            ));
        }
        for i in 0..n_images {
            let band = band_job(
                job,
                i,
                &attrs.pixels_list[i],
                &attrs.labels_list[i],
                &attrs.out_list[i],
            )?;
            if subjobs.send(band).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn band_job(
    job: &Job,
    index: usize,
    pixels: &str,
    labels: &str,
    out: &str,
) -> Result<Job, SchedulerError> {
    if pixels.is_empty() {
        return Err(SchedulerError::Validation(
            "no source pixels has been defined".into(),
        ));
    }
    if labels.is_empty() {
        return Err(SchedulerError::Validation(
            "no source labels has been defined".into(),
        ));
    }
    if out.is_empty() {
        return Err(SchedulerError::Validation(
            "no output image has been defined".into(),
        ));
    }
    let mut args = job.args.clone();
    args.set_int("clientIndex", index as i64);
    args.set_string("pixels", pixels);
    args.set_string("labels", labels);
    args.set_string("out", out);
    Ok(Job {
        name: format!("{}_{index}", job.name),
        executable: job.executable.clone(),
        args,
        builder: job.builder.clone(),
    })
}

/// Orchestrates one DMG server and its per-band clients.
pub struct BandsProcessor {
    image_processor: Arc<dyn Processor>,
    resources: Config,
}

impl BandsProcessor {
    pub fn new(image_processor: Arc<dyn Processor>, resources: Config) -> Self {
        Self {
            image_processor,
            resources,
        }
    }

    async fn start_server(
        &self,
        job: &Job,
        attrs: &DmgAttrs,
    ) -> Result<(Box<dyn JobMonitor>, String), SchedulerError> {
        info!("Start DMG Server");
        let server_job = Job {
            name: format!("{}-Server", job.name),
            executable: self.resources.get_string("dmgServer"),
            args: job.args.clone(),
            builder: Some(Arc::new(ServerCommand)),
        };
        let mut monitor = self.image_processor.start(server_job).await?;

        // A preconfigured address short-circuits the stdout rendezvous.
        if !attrs.server_address.is_empty() {
            return Ok((monitor, attrs.server_address.clone()));
        }

        let mut output = monitor.stdout().await?;
        let address = read_server_address(&mut output).await?;
        info!("Server started on {address}");
        // Keep draining whatever the server prints after the address so its
        // pipe buffer cannot fill up.
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut output, &mut tokio::io::stdout()).await;
        });
        Ok((monitor, address))
    }
}

#[async_trait]
impl Processor for BandsProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let attrs = DmgAttrs::extract(&job.args)?;
        attrs.validate()?;

        let (server_monitor, server_address) = self.start_server(&job, &attrs).await?;

        let mut client_args = job.args.clone();
        client_args.set_string("serverAddress", &server_address);
        let client_job = Job {
            name: format!("{}-Client", job.name),
            executable: self.resources.get_string("dmgClient"),
            args: client_args,
            builder: Some(Arc::new(ClientCommand)),
        };
        let client_processor = ParallelProcessor::new(
            Arc::clone(&self.image_processor),
            Arc::new(BandSplitter),
            self.resources.clone(),
        );
        info!("Start DMG Client");
        let client_monitor = client_processor.start(client_job).await?;

        Ok(Box::new(DmgMonitor {
            server: Some(server_monitor),
            client: client_monitor,
        }))
    }
}

/// Composite monitor over the server process and the client group.
struct DmgMonitor {
    server: Option<Box<dyn JobMonitor>>,
    client: Box<dyn JobMonitor>,
}

#[async_trait]
impl JobMonitor for DmgMonitor {
    async fn wait(&mut self) -> Result<(), SchedulerError> {
        // The server is designed to outlive the clients; its exit status is
        // informational only.
        match self.server.take() {
            Some(mut server) => {
                tokio::spawn(async move {
                    if let Err(err) = server.wait().await {
                        warn!("error waiting for the DMG server to terminate: {err}");
                    }
                });
            }
            None => warn!("no server job has been started"),
        }

        self.client.wait().await?;
        info!("DMG processing completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_address() {
        assert_eq!(
            parse_server_address("Server Address: 10.0.0.4:11001\n"),
            Some("10.0.0.4:11001".to_string())
        );
        assert_eq!(parse_server_address("warming up"), None);
        assert_eq!(parse_server_address("Server Address: "), None);
    }

    #[tokio::test]
    async fn test_read_server_address_skips_preamble() {
        let mut output: OutputStream = Box::new(std::io::Cursor::new(
            b"warming up\nServer Address: 10.0.0.4:11001\nready\n".to_vec(),
        ));
        let address = read_server_address(&mut output).await.unwrap();
        assert_eq!(address, "10.0.0.4:11001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_server_address_times_out() {
        // An output that ends without ever printing the address.
        let mut output: OutputStream = Box::new(std::io::Cursor::new(b"warming up\n".to_vec()));
        let err = read_server_address(&mut output).await.unwrap_err();
        assert!(err.to_string().contains("could not read the server address"));
    }

    #[tokio::test]
    async fn test_band_splitter_singleton() {
        let registry = Arc::new(DmgAttrs::registry());
        let mut args = crate::args::JobArgs::new(registry);
        args.set_string("pixels", "/data/p.iGrid");
        args.set_string("labels", "/data/l.iGrid");
        args.set_string("out", "/data/o.iGrid");
        let job = Job {
            name: "dmg".into(),
            executable: "/opt/dmg/client".into(),
            args,
            builder: None,
        };

        let (tx, mut rx) = mpsc::channel(4);
        BandSplitter.split(&job, &tx).await.unwrap();
        drop(tx);

        let band = rx.recv().await.unwrap();
        assert_eq!(band.name, "dmg_0");
        assert_eq!(band.args.get_int("clientIndex").unwrap(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_band_splitter_lists() {
        let registry = Arc::new(DmgAttrs::registry());
        let mut args = crate::args::JobArgs::new(registry);
        args.set_string_list("pixelsList", vec!["p0".into(), "p1".into(), "p2".into()]);
        args.set_string_list("labelsList", vec!["l0".into(), "l1".into(), "l2".into()]);
        args.set_string_list("outList", vec!["o0".into(), "o1".into(), "o2".into()]);
        let job = Job {
            name: "dmg".into(),
            executable: "/opt/dmg/client".into(),
            args,
            builder: None,
        };

        let (tx, mut rx) = mpsc::channel(4);
        BandSplitter.split(&job, &tx).await.unwrap();
        drop(tx);

        for i in 0..3 {
            let band = rx.recv().await.unwrap();
            assert_eq!(band.name, format!("dmg_{i}"));
            assert_eq!(band.args.get_int("clientIndex").unwrap(), i);
            assert_eq!(band.args.get_string("pixels").unwrap(), format!("p{i}"));
            assert_eq!(band.args.get_string("labels").unwrap(), format!("l{i}"));
            assert_eq!(band.args.get_string("out").unwrap(), format!("o{i}"));
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_band_splitter_rejects_empty_entries() {
        let registry = Arc::new(DmgAttrs::registry());
        let mut args = crate::args::JobArgs::new(registry);
        args.set_string_list("pixelsList", vec!["p0".into(), "".into()]);
        args.set_string_list("labelsList", vec!["l0".into(), "l1".into()]);
        args.set_string_list("outList", vec!["o0".into(), "o1".into()]);
        let job = Job {
            name: "dmg".into(),
            executable: String::new(),
            args,
            builder: None,
        };

        let (tx, mut rx) = mpsc::channel(4);
        let err = BandSplitter.split(&job, &tx).await.unwrap_err();
        assert!(err.to_string().contains("no source pixels"));
        drop(tx);
        // The first, valid band was still emitted before the failure.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
