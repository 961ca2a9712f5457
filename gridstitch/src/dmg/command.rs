//! Command-line builders for the DMG executables.

use super::DmgAttrs;
use crate::args::JobArgs;
use crate::job::{CommandBuilder, SchedulerError};

/// Builds the argv for the DMG server executable.
pub struct ServerCommand;

impl CommandBuilder for ServerCommand {
    fn build(&self, args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = DmgAttrs::extract(args)?;
        let mut argv = Vec::new();
        if attrs.server_port > 0 {
            argv.extend(["--port".into(), attrs.server_port.to_string()]);
        }
        argv.extend(["--count".into(), attrs.sections.to_string()]);
        argv.extend(["--iters".into(), attrs.iterations.to_string()]);
        argv.extend(["--vCycles".into(), attrs.v_cycles.to_string()]);
        argv.extend(["--iWeight".into(), attrs.i_weight.to_string()]);
        argv.extend(["--gWeight".into(), attrs.g_weight.to_string()]);
        argv.extend(["--gScale".into(), attrs.g_scale.to_string()]);
        argv.extend(["--tileExt".into(), attrs.tile_ext.clone()]);
        argv.extend(["--tileWidth".into(), attrs.tile_width.to_string()]);
        argv.extend(["--tileHeight".into(), attrs.tile_height.to_string()]);
        if attrs.verbose {
            argv.push("--verbose".into());
        }
        if attrs.gray {
            argv.push("--gray".into());
        }
        if attrs.deramp {
            argv.push("--deramp".into());
        }
        Ok(argv)
    }
}

/// Builds the argv for a DMG client executable.
pub struct ClientCommand;

impl CommandBuilder for ClientCommand {
    fn build(&self, args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = DmgAttrs::extract(args)?;
        let mut argv = Vec::new();
        if attrs.server_port > 0 {
            argv.extend(["--port".into(), attrs.server_port.to_string()]);
        }
        if !attrs.server_address.is_empty() {
            argv.extend(["--address".into(), attrs.server_address.clone()]);
        }
        if attrs.client_index > 0 {
            argv.extend(["--index".into(), attrs.client_index.to_string()]);
        }
        if attrs.threads > 1 {
            argv.extend(["--threads".into(), attrs.threads.to_string()]);
        }
        argv.extend(["--pixels".into(), attrs.pixels.clone()]);
        argv.extend(["--labels".into(), attrs.labels.clone()]);
        argv.extend(["--out".into(), attrs.out.clone()]);
        argv.extend(["--temp".into(), attrs.scratch_dir.clone()]);
        Ok(argv)
    }
}

/// Pass-through builder that re-invokes the orchestrator binary for a DMG
/// operation, locally or on the grid. Re-emits the full flag set so the
/// re-invoked process reproduces this run's arguments.
#[derive(Debug, Clone, Default)]
pub struct SectionCommand {
    pub operation: String,
    pub dmg_processor: String,
    pub section_processor: String,
    pub cluster_account_id: String,
    pub session_name: String,
    pub job_name: String,
}

impl CommandBuilder for SectionCommand {
    fn build(&self, args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = DmgAttrs::extract(args)?;
        let mut argv = vec![
            "-dmgProcessor".to_string(),
            self.dmg_processor.clone(),
            "-sectionProcessor".to_string(),
            self.section_processor.clone(),
        ];
        if !self.cluster_account_id.is_empty() {
            argv.extend(["-A".into(), self.cluster_account_id.clone()]);
        }
        if !self.session_name.is_empty() {
            argv.extend(["-sessionName".into(), self.session_name.clone()]);
        }
        if !self.job_name.is_empty() {
            argv.extend(["-jobName".into(), self.job_name.clone()]);
        }
        argv.push(self.operation.clone());

        if !attrs.configs.is_empty() {
            argv.extend(["-config".into(), attrs.configs.join(",")]);
        }
        if attrs.server_port > 0 {
            argv.extend(["-serverPort".into(), attrs.server_port.to_string()]);
        }
        if !attrs.pixels.is_empty() && !attrs.labels.is_empty() {
            argv.extend(["-pixels".into(), attrs.pixels.clone()]);
            argv.extend(["-labels".into(), attrs.labels.clone()]);
        }
        if !attrs.pixels_list.is_empty() && !attrs.labels_list.is_empty() {
            argv.extend(["-pixelsList".into(), attrs.pixels_list.join(",")]);
            argv.extend(["-labelsList".into(), attrs.labels_list.join(",")]);
        }
        if !attrs.out_list.is_empty() {
            argv.extend(["-outList".into(), attrs.out_list.join(",")]);
        }
        argv.extend(["-temp".into(), attrs.scratch_dir.clone()]);
        argv.extend(["-targetDir".into(), attrs.target_dir.clone()]);
        argv.extend(["-out".into(), attrs.out.clone()]);
        argv.extend(["-threads".into(), attrs.threads.to_string()]);
        argv.extend(["-sections".into(), attrs.sections.to_string()]);
        argv.extend(["-iters".into(), attrs.iterations.to_string()]);
        argv.extend(["-vCycles".into(), attrs.v_cycles.to_string()]);
        argv.extend(["-iWeight".into(), attrs.i_weight.to_string()]);
        argv.extend(["-gWeight".into(), attrs.g_weight.to_string()]);
        argv.extend(["-gScale".into(), attrs.g_scale.to_string()]);
        argv.extend(["-tileExt".into(), attrs.tile_ext.clone()]);
        argv.extend(["-tileWidth".into(), attrs.tile_width.to_string()]);
        argv.extend(["-tileHeight".into(), attrs.tile_height.to_string()]);
        if attrs.verbose {
            argv.push("-verbose".into());
        }
        if attrs.gray {
            argv.push("-gray".into());
        }
        if attrs.deramp {
            argv.push("-deramp".into());
        }
        Ok(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn args() -> JobArgs {
        JobArgs::new(Arc::new(DmgAttrs::registry()))
    }

    #[test]
    fn test_server_command_defaults() {
        let argv = ServerCommand.build(&args()).unwrap();
        // The unset port is skipped, the defaults are spelled out.
        assert!(!argv.contains(&"--port".to_string()));
        assert!(argv.windows(2).any(|w| w == ["--count", "1"]));
        assert!(argv.windows(2).any(|w| w == ["--iters", "5"]));
        assert!(argv.windows(2).any(|w| w == ["--gWeight", "1"]));
        assert!(argv.contains(&"--gray".to_string()));
        assert!(argv.contains(&"--deramp".to_string()));
        assert!(!argv.contains(&"--verbose".to_string()));
    }

    #[test]
    fn test_client_command_carries_server_address() {
        let mut a = args();
        a.set_string("serverAddress", "10.0.0.4:11001");
        a.set_string("pixels", "/data/p.iGrid");
        a.set_string("labels", "/data/l.iGrid");
        a.set_string("out", "/data/o.iGrid");
        a.set_int("clientIndex", 2);

        let argv = ClientCommand.build(&a).unwrap();
        assert!(argv.windows(2).any(|w| w == ["--address", "10.0.0.4:11001"]));
        assert!(argv.windows(2).any(|w| w == ["--index", "2"]));
        assert!(argv.windows(2).any(|w| w == ["--pixels", "/data/p.iGrid"]));
    }

    #[test]
    fn test_client_command_skips_index_zero_and_single_thread() {
        let argv = ClientCommand.build(&args()).unwrap();
        assert!(!argv.contains(&"--index".to_string()));
        assert!(!argv.contains(&"--threads".to_string()));
    }

    #[test]
    fn test_section_command_reinvocation() {
        let mut a = args();
        a.set_string_list("config", vec!["/etc/stitch.json".into()]);
        a.set_int("sections", 2);
        a.set_string_list("pixelsList", vec!["p0".into(), "p1".into()]);
        a.set_string_list("labelsList", vec!["l0".into(), "l1".into()]);
        a.set_string_list("outList", vec!["o0".into(), "o1".into()]);
        a.set_string("targetDir", "/scratch/section");

        let builder = SectionCommand {
            operation: "dmgImage".into(),
            dmg_processor: "drmaa1".into(),
            section_processor: "local".into(),
            cluster_account_id: "imgproc".into(),
            job_name: "sec-12".into(),
            ..Default::default()
        };
        let argv = builder.build(&a).unwrap();

        assert_eq!(argv[0], "-dmgProcessor");
        assert_eq!(argv[1], "drmaa1");
        assert!(argv.windows(2).any(|w| w == ["-A", "imgproc"]));
        let op_at = argv.iter().position(|t| t == "dmgImage").unwrap();
        // The operation follows the submission selectors.
        assert!(op_at > 0);
        assert!(argv.windows(2).any(|w| w == ["-config", "/etc/stitch.json"]));
        assert!(argv.windows(2).any(|w| w == ["-pixelsList", "p0,p1"]));
        assert!(argv.windows(2).any(|w| w == ["-outList", "o0,o1"]));
        assert!(argv.windows(2).any(|w| w == ["-sections", "2"]));
    }
}
