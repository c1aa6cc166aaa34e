//! Host-agent installation and host-ID discovery.

use std::io;

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use tracing::{debug, info};

use super::{NodeOrchestrator, Stage};
use crate::control_plane::ControlPlaneApi;
use crate::error::Pf9Error;
use crate::executor::{Executor, quote_command};
use crate::platform::OsFamily;

/// File the host agent writes its ID to once registered.
pub const HOST_ID_CONF: &str = "/etc/pf9/host_id.conf";
/// Log on the target that collects installer output.
pub const INSTALL_LOG: &str = "/tmp/pf9-install.log";

const INSTALLER_MODE: u32 = 0o755;

/// Extracts the value of the `host_id` line from `host_id.conf`.
#[must_use]
pub fn parse_host_id(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "host_id")
        .map(|(_, value)| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

impl<C: ControlPlaneApi> NodeOrchestrator<C> {
    /// Returns the host ID when `host_id.conf` already exists.
    pub(super) async fn existing_host_id(
        &self,
        executor: &dyn Executor,
    ) -> Result<Option<String>, Pf9Error> {
        match executor.run("test", &["-f", HOST_ID_CONF]).await {
            Ok(()) => self.read_host_id(executor).await.map(Some),
            Err(err) if err.exited_with(1) => Ok(None),
            Err(err) => Err(Pf9Error::executor(Stage::RunPrereqChecks, err)),
        }
    }

    pub(super) async fn read_host_id(&self, executor: &dyn Executor) -> Result<String, Pf9Error> {
        let text = executor
            .run_with_stdout("cat", &[HOST_ID_CONF])
            .await
            .map_err(|err| Pf9Error::executor(Stage::ReadLocalHostId, err))?;
        parse_host_id(&text).ok_or_else(|| Pf9Error::HostIdMissing {
            host: executor.target().to_owned(),
        })
    }

    fn installer_flags(&self) -> Vec<String> {
        let mut flags = vec![self.ctx.proxy_url.as_ref().map_or_else(
            || String::from("--no-proxy"),
            |url| format!("--proxy={url}"),
        )];
        flags.extend([
            String::from("--skip-os-check"),
            String::from("--ntpd"),
            String::from("--insecure"),
            format!("--project-name={}", self.ctx.tenant),
            format!("--controller={}", self.ctx.controller),
            format!("--user-token={}", self.ctx.token),
        ]);
        flags
    }

    /// Returns the cached installer for `family`, downloading it first when
    /// the cache is empty.
    async fn cached_installer(&self, family: OsFamily) -> Result<Utf8PathBuf, Pf9Error> {
        let _guard = self.installer_lock.lock().await;
        let work_dir = &self.ctx.work_dir;
        let file_name = format!("installer-{}.sh", family.installer_flavour());
        let path = work_dir.join(&file_name);
        let io_err = |err: &io::Error| Pf9Error::Io {
            path: path.clone(),
            message: err.to_string(),
        };

        Dir::create_ambient_dir_all(work_dir, ambient_authority()).map_err(|err| io_err(&err))?;
        let dir = Dir::open_ambient_dir(work_dir, ambient_authority()).map_err(|err| io_err(&err))?;
        if dir.exists(&file_name) {
            debug!(%path, "using cached installer");
            return Ok(path);
        }

        let bytes = self
            .api
            .download_installer(&self.ctx.token, family)
            .await
            .map_err(Pf9Error::from)?;
        dir.write(&file_name, &bytes).map_err(|err| io_err(&err))?;
        info!(%path, bytes = bytes.len(), "cached installer");
        Ok(path)
    }

    pub(super) async fn install_host_agent(
        &self,
        executor: &dyn Executor,
        family: OsFamily,
    ) -> Result<(), Pf9Error> {
        let host = executor.target();
        let local = self.cached_installer(family).await?;
        let remote = format!("/tmp/installer-{}.sh", family.installer_flavour());
        executor
            .stage_file(&local, &remote, INSTALLER_MODE)
            .await
            .map_err(|err| Pf9Error::executor(Stage::InstallHostAgent, err))?;

        let flags = self.installer_flags();
        let mut args = vec![remote.as_str()];
        args.extend(flags.iter().map(String::as_str));
        let script = format!(
            "{} 2>&1 | tee -a {INSTALL_LOG}; exit ${{PIPESTATUS[0]}}",
            quote_command("bash", &args)
        );

        info!(host, log = INSTALL_LOG, "running host-agent installer");
        executor
            .run("bash", &["-c", &script])
            .await
            .map_err(|err| Pf9Error::executor(Stage::InstallHostAgent, err))?;
        info!(host, "host agent installed");
        Ok(())
    }
}
