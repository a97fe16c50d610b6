use crate::client::aggregate::AggregateBuckets;
use crate::config::AppConfig;
use crate::error::SubmitError;
use crate::models::{CacheInfo, CheckResult, Perfdata, State};
use crate::utils::file::unix_now;
use log::{debug, info};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

/// Stands in for `|` in plugin output, where it would start the perfdata.
const LIGHT_VERTICAL_BAR: char = '\u{2758}';

/// A result as handed to a persistent core helper.
#[derive(Debug, Clone, PartialEq)]
pub struct KeepaliveResult {
    pub host: String,
    pub service: String,
    pub state: State,
    pub output: String,
    pub cache_info: Option<CacheInfo>,
}

/// The command pipe is opened at most once per run.
enum PipeState {
    Unopened,
    Open(File),
    Failed,
}

enum Channel {
    Keepalive(UnboundedSender<KeepaliveResult>),
    /// Opened on first use.
    Pipe { path: PathBuf, pipe: PipeState },
    /// One result file per run, created on first use.
    ResultFile {
        dir: PathBuf,
        current: Option<(File, PathBuf)>,
    },
}

/// Hands check results to the monitoring core.
pub struct Submitter {
    channel: Channel,
    dont_submit: bool,
    perfdata_format: String,
}

impl Submitter {
    /// Pipe or result file, as configured in `[submission] mode`.
    pub fn from_config(config: &AppConfig) -> Result<Self, SubmitError> {
        let channel = match config.submission.mode.as_str() {
            "pipe" => Channel::Pipe {
                path: config.paths.command_pipe.clone(),
                pipe: PipeState::Unopened,
            },
            "file" => Channel::ResultFile {
                dir: config.paths.check_result_dir.clone(),
                current: None,
            },
            other => return Err(SubmitError::InvalidMode(other.to_string())),
        };
        Ok(Self::with_channel(channel, config))
    }

    /// Streams results to a persistent helper instead of the core.
    pub fn keepalive(sender: UnboundedSender<KeepaliveResult>, config: &AppConfig) -> Self {
        Self::with_channel(Channel::Keepalive(sender), config)
    }

    fn with_channel(channel: Channel, config: &AppConfig) -> Self {
        Self {
            channel,
            dont_submit: config.checking.dont_submit,
            perfdata_format: config.checking.perfdata_format.clone(),
        }
    }

    /// Formats a check result, files it into its aggregation and sends it
    /// to the core.
    pub fn submit_check_result(
        &mut self,
        aggregates: &mut AggregateBuckets,
        host: &str,
        description: &str,
        result: CheckResult,
        aggregation: Option<&str>,
        cache_info: Option<CacheInfo>,
    ) -> Result<(), SubmitError> {
        let CheckResult {
            state,
            text,
            perfdata,
        } = result;
        let infotext = plugin_output(state, &text);

        if let Some(aggregation) = aggregation.filter(|a| !a.is_empty()) {
            aggregates.store(description, aggregation, state, &infotext);
        }

        let perftext = perfdata
            .as_ref()
            .map(|p| self.perftext(p))
            .unwrap_or_default();

        if !self.dont_submit {
            let output = format!("{}{}", infotext, perftext);
            self.submit_to_core(host, description, state, &output, cache_info)?;
        }

        info!(
            "{:<20} {} {}",
            description,
            state,
            infotext.lines().next().unwrap_or_default()
        );
        Ok(())
    }

    fn perftext(&self, perfdata: &Perfdata) -> String {
        if perfdata.is_empty() {
            return String::new();
        }
        let mut perftexts: Vec<String> = perfdata.metrics.iter().map(|m| m.render()).collect();
        if let Some(command) = &perfdata.check_command {
            if self.perfdata_format == "pnp" {
                perftexts.push(format!("[{}]", command));
            }
        }
        format!("|{}", perftexts.join(" "))
    }

    pub fn submit_to_core(
        &mut self,
        host: &str,
        service: &str,
        state: State,
        output: &str,
        cache_info: Option<CacheInfo>,
    ) -> Result<(), SubmitError> {
        match &mut self.channel {
            Channel::Keepalive(sender) => sender
                .send(KeepaliveResult {
                    host: host.to_string(),
                    service: service.to_string(),
                    state,
                    output: output.to_string(),
                    cache_info,
                })
                .map_err(|_| SubmitError::ChannelClosed),
            Channel::Pipe { path, pipe } => {
                if let PipeState::Unopened = pipe {
                    match open_command_pipe(path) {
                        Ok(file) => *pipe = PipeState::Open(file),
                        Err(e) => {
                            *pipe = PipeState::Failed;
                            return Err(e);
                        }
                    }
                }
                let PipeState::Open(pipe) = pipe else {
                    debug!("Not submitting {} of {}: command pipe unavailable", service, host);
                    return Ok(());
                };
                let line = format!(
                    "[{}] PROCESS_SERVICE_CHECK_RESULT;{};{};{};{}\n",
                    unix_now(),
                    host,
                    service,
                    state.code(),
                    output.replace('\n', "\\n")
                );
                // The core needs the whole command in one write.
                pipe.write_all(line.as_bytes()).map_err(SubmitError::Pipe)?;
                pipe.flush().map_err(SubmitError::Pipe)
            }
            Channel::ResultFile { dir, current } => {
                if current.is_none() {
                    *current = Some(open_check_result_file(dir)?);
                }
                let Some((file, _)) = current else {
                    return Ok(());
                };
                let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
                let record = format!(
                    "host_name={}\nservice_description={}\ncheck_type=1\ncheck_options=0\nreschedule_check\nlatency=0.0\nstart_time={:.1}\nfinish_time={:.1}\nreturn_code={}\noutput={}\n\n",
                    host,
                    service,
                    now,
                    now,
                    state.code(),
                    output.replace('\n', "\\n")
                );
                file.write_all(record.as_bytes())?;
                Ok(())
            }
        }
    }

    /// Completes the run's result file with its `.ok` marker.
    pub fn finish(&mut self) -> Result<(), SubmitError> {
        if let Channel::ResultFile { current, .. } = &mut self.channel {
            if let Some((mut file, path)) = current.take() {
                file.flush()?;
                drop(file);
                let mut marker = path.into_os_string();
                marker.push(".ok");
                File::create(&marker)?;
                debug!("Completed check result file {:?}", marker);
            }
        }
        Ok(())
    }
}

/// Prefixes the state label unless the plugin already did and removes
/// vertical bars from the text.
fn plugin_output(state: State, text: &str) -> String {
    let labelled = ["OK -", "WARN -", "CRIT -", "UNKNOWN -"]
        .iter()
        .any(|label| text.starts_with(label));
    let text = if labelled {
        text.to_string()
    } else {
        format!("{} - {}", state.short_name(), text)
    };
    text.replace('|', &LIGHT_VERTICAL_BAR.to_string())
}

/// Non-blocking open: fails right away if nobody reads the pipe. Writes
/// block, so a full pipe never tears a command.
fn open_command_pipe(path: &PathBuf) -> Result<File, SubmitError> {
    if !path.exists() {
        return Err(SubmitError::MissingPipe(path.clone()));
    }
    let pipe = OpenOptions::new()
        .append(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
        .map_err(SubmitError::Pipe)?;
    clear_nonblocking(&pipe).map_err(SubmitError::Pipe)?;
    Ok(pipe)
}

fn clear_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags - OFlag::O_NONBLOCK))?;
    Ok(())
}

fn open_check_result_file(dir: &PathBuf) -> Result<(File, PathBuf), SubmitError> {
    let result_file_error = |source: std::io::Error| SubmitError::ResultFile {
        path: dir.clone(),
        source,
    };
    // The core deletes the file once it has read it.
    tempfile::Builder::new()
        .prefix("c")
        .rand_bytes(6)
        .tempfile_in(dir)
        .map_err(result_file_error)?
        .keep()
        .map_err(|e| result_file_error(e.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;
    use std::fs;

    fn config_in(dir: &std::path::Path, mode: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.submission.mode = mode.to_string();
        config.paths.command_pipe = dir.join("nagios.cmd");
        config.paths.check_result_dir = dir.join("checkresults");
        config
    }

    #[test]
    fn test_plugin_output_label_and_bar() {
        assert_eq!(plugin_output(State::Warn, "load 5|7"), "WARN - load 5\u{2758}7");
        assert_eq!(plugin_output(State::Crit, "OK - already labelled"), "OK - already labelled");
        assert!(!plugin_output(State::Ok, "a|b|c").contains('|'));
    }

    #[test]
    fn test_invalid_mode() {
        let dir = tempfile::tempdir().unwrap();
        let result = Submitter::from_config(&config_in(dir.path(), "carrier-pigeon"));
        assert!(matches!(result, Err(SubmitError::InvalidMode(mode)) if mode == "carrier-pigeon"));
    }

    #[test]
    fn test_missing_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = Submitter::from_config(&config_in(dir.path(), "pipe")).unwrap();
        let err = submitter
            .submit_to_core("host1", "CPU load", State::Ok, "OK - fine", None)
            .unwrap_err();
        assert!(matches!(err, SubmitError::MissingPipe(_)));

        // Not retried once the open failed, even if the pipe shows up.
        fs::write(dir.path().join("nagios.cmd"), "").unwrap();
        submitter
            .submit_to_core("host1", "Disk", State::Ok, "OK - fine", None)
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("nagios.cmd")).unwrap(), "");
    }

    #[test]
    fn test_full_pipe_blocks_instead_of_tearing_commands() {
        use nix::sys::stat::Mode;
        use std::io::Read;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "pipe");
        nix::unistd::mkfifo(&config.paths.command_pipe, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        let mut reader = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&config.paths.command_pipe)
            .unwrap();

        let mut submitter = Submitter::from_config(&config).unwrap();
        let writer = std::thread::spawn(move || {
            let output = format!("OK - {}", "x".repeat(1000));
            for i in 0..200 {
                submitter.submit_to_core("host1", &format!("svc{}", i), State::Ok, &output, None)?;
            }
            Ok::<(), SubmitError>(())
        });

        // Let the writer fill the pipe buffer before anything is read.
        std::thread::sleep(Duration::from_millis(300));
        clear_nonblocking(&reader).unwrap();
        let mut received = String::new();
        reader.read_to_string(&mut received).unwrap();
        writer.join().unwrap().unwrap();

        let lines: Vec<&str> = received.lines().collect();
        assert_eq!(lines.len(), 200);
        for (i, line) in lines.iter().enumerate() {
            let prefix = format!("PROCESS_SERVICE_CHECK_RESULT;host1;svc{};0;OK - ", i);
            assert!(line.split_once("] ").unwrap().1.starts_with(&prefix));
            assert!(line.ends_with(&"x".repeat(1000)));
        }
    }

    #[test]
    fn test_pipe_line() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "pipe");
        fs::write(&config.paths.command_pipe, "").unwrap();
        let mut submitter = Submitter::from_config(&config).unwrap();
        let mut aggregates = AggregateBuckets::new("multiline");

        let mut result = CheckResult::new(State::Warn, "load is high | really\nsecond line");
        result.perfdata = Some(Perfdata {
            metrics: vec![Metric::new("load1", 4.5)],
            check_command: Some("check_mk-cpu.loads".to_string()),
        });
        submitter
            .submit_check_result(&mut aggregates, "host1", "CPU load", result, None, None)
            .unwrap();

        let written = fs::read_to_string(&config.paths.command_pipe).unwrap();
        let line = written.strip_suffix('\n').unwrap();
        assert!(!line.contains('\n'));
        let (timestamp, rest) = line.split_once("] ").unwrap();
        assert!(timestamp.trim_start_matches('[').parse::<i64>().is_ok());
        assert_eq!(
            rest,
            "PROCESS_SERVICE_CHECK_RESULT;host1;CPU load;1;WARN - load is high \u{2758} really\\nsecond line|load1=4.5;;;; [check_mk-cpu.loads]"
        );
        assert!(aggregates.is_empty());
    }

    #[test]
    fn test_result_file_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "file");
        fs::create_dir_all(&config.paths.check_result_dir).unwrap();
        let mut submitter = Submitter::from_config(&config).unwrap();

        submitter
            .submit_to_core("host1", "Uptime", State::Ok, "OK - up", None)
            .unwrap();
        submitter
            .submit_to_core("host1", "Disk", State::Crit, "CRIT - full", None)
            .unwrap();
        submitter.finish().unwrap();

        let mut names: Vec<String> = fs::read_dir(&config.paths.check_result_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with('c'));
        assert_eq!(names[1], format!("{}.ok", names[0]));

        let content = fs::read_to_string(config.paths.check_result_dir.join(&names[0])).unwrap();
        let records: Vec<&str> = content.split("\n\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].starts_with("host_name=host1\nservice_description=Uptime\ncheck_type=1\ncheck_options=0\nreschedule_check\nlatency=0.0\nstart_time="));
        assert!(records[1].contains("\nreturn_code=2\noutput=CRIT - full"));
    }

    #[test]
    fn test_keepalive_and_aggregation() {
        let mut config = AppConfig::default();
        config.checking.perfdata_format = "standard".to_string();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut submitter = Submitter::keepalive(tx, &config);
        let mut aggregates = AggregateBuckets::new("singleline");

        let mut result = CheckResult::new(State::Crit, "disk failed");
        result.perfdata = Some(Perfdata {
            metrics: vec![Metric::new("errors", 3i64)],
            check_command: Some("ignored".to_string()),
        });
        submitter
            .submit_check_result(
                &mut aggregates,
                "host1",
                "Disk sda",
                result,
                Some("Disks"),
                Some(CacheInfo::new(1000, 60)),
            )
            .unwrap();

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.output, "CRIT - disk failed|errors=3;;;;");
        assert_eq!(sent.cache_info, Some(CacheInfo::new(1000, 60)));
        assert_eq!(
            aggregates.flush(),
            vec![(
                "Disks".to_string(),
                State::Crit,
                "Disk sda CRIT - disk failed".to_string()
            )]
        );
    }

    #[test]
    fn test_dont_submit_still_aggregates() {
        let mut config = AppConfig::default();
        config.checking.dont_submit = true;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut submitter = Submitter::keepalive(tx, &config);
        let mut aggregates = AggregateBuckets::new("multiline");

        submitter
            .submit_check_result(
                &mut aggregates,
                "host1",
                "NTP",
                CheckResult::new(State::Ok, "synced"),
                Some("Time"),
                None,
            )
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!aggregates.is_empty());
    }
}
