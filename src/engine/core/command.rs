use super::error::ConfigError;
use super::types::{EncoderSettings, EncodingJob, PassKind, PipelineSpec, ProcessCommand};
use std::path::PathBuf;

/// Placeholder in the ffmpeg templates replaced by the output path (without extension)
pub const FILE_PLACEHOLDER: &str = "{file}";

const TRACE_EXTENSION: &str = ".trace";

/// Derive the output basename from a trace path.
///
/// Both `/` and `\` count as separators whatever the host, so a Windows path
/// handed to a Linux build still yields `level1` for `C:\captures\level1.trace`.
pub fn trace_basename(trace_path: &str) -> String {
    let last = trace_path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .last()
        .unwrap_or("");

    last.strip_suffix(TRACE_EXTENSION).unwrap_or(last).to_string()
}

/// Split a user template into arguments and substitute `{file}`.
///
/// Uses shell-style parsing so quoted paths with spaces stay one argument.
fn expand_template(template: &str, pass: PassKind, file: &str) -> Result<Vec<String>, ConfigError> {
    if !template.contains(FILE_PLACEHOLDER) {
        return Err(ConfigError::new(format!(
            "{} command template is missing the {} placeholder: {}",
            pass.label(),
            FILE_PLACEHOLDER,
            template
        )));
    }

    let args = shlex::split(template).ok_or_else(|| {
        ConfigError::new(format!(
            "{} command template has unbalanced quotes: {}",
            pass.label(),
            template
        ))
    })?;

    Ok(args
        .into_iter()
        .map(|arg| arg.replace(FILE_PLACEHOLDER, file))
        .collect())
}

/// Producer command, identical for every pass: dump frames as PPM to stdout
pub fn build_dump_cmd(job: &EncodingJob, settings: &EncoderSettings) -> ProcessCommand {
    ProcessCommand::new(&settings.dump_executable)
        .args(["dump-images", "-o", "-"])
        .arg(job.trace_path.as_str())
}

/// Consumer command for one pass.
///
/// The raw pass pins output framerate and size; the sample pass lets ffmpeg
/// keep whatever the decoded stream provides.
pub fn build_encode_cmd(
    job: &EncodingJob,
    settings: &EncoderSettings,
    pass: PassKind,
    file: &str,
) -> Result<ProcessCommand, ConfigError> {
    let fps = job.fps.to_string();

    let mut cmd = ProcessCommand::new(&settings.encode_executable)
        .arg("-r")
        .arg(fps.as_str())
        .args(["-f", "image2pipe", "-vcodec", "ppm", "-i", "pipe:"]);

    let template = match pass {
        PassKind::Raw => {
            cmd = cmd
                .arg("-r")
                .arg(fps.as_str())
                .arg("-s")
                .arg(job.scale.as_str());
            &settings.raw_args_template
        }
        PassKind::Sample => &settings.sample_args_template,
    };

    Ok(cmd.args(expand_template(template, pass, file)?))
}

/// Output path (without extension) substituted for `{file}` in a pass
pub fn output_stem(job: &EncodingJob, pass: PassKind) -> PathBuf {
    let name = format!("{}{}", trace_basename(&job.trace_path), pass.file_suffix());
    job.output_dir.join(name)
}

/// Build the producer | consumer pair for one pass.
///
/// Pure: performs no I/O and gives the same spec for the same inputs.
pub fn build_pipeline(
    job: &EncodingJob,
    settings: &EncoderSettings,
    pass: PassKind,
) -> Result<PipelineSpec, ConfigError> {
    if trace_basename(&job.trace_path).is_empty() {
        return Err(ConfigError::new(format!(
            "cannot derive an output name from trace path: {:?}",
            job.trace_path
        )));
    }

    let stem = output_stem(job, pass);
    let file = stem.to_str().ok_or_else(|| {
        ConfigError::new(format!(
            "output path is not valid UTF-8: {}",
            stem.display()
        ))
    })?;

    let consumer = build_encode_cmd(job, settings, pass, file)?;

    Ok(PipelineSpec {
        pass,
        producer: build_dump_cmd(job, settings),
        consumer,
        output_stem: stem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            dump_executable: PathBuf::from("/opt/apitrace/bin/apitrace"),
            encode_executable: PathBuf::from("/usr/bin/ffmpeg"),
            raw_args_template: r#"-vcodec libx264 -preset veryslow -qp 0 -y "{file}.mkv""#
                .to_string(),
            sample_args_template: r#"-vcodec mpeg4 -y "{file}.avi""#.to_string(),
        }
    }

    fn job(trace: &str) -> EncodingJob {
        EncodingJob {
            trace_path: trace.to_string(),
            output_dir: PathBuf::from("/renders"),
            scale: "1920x1080".to_string(),
            fps: 60,
            sample_enabled: true,
        }
    }

    fn argv(cmd: &ProcessCommand) -> String {
        std::iter::once(cmd.program.to_string_lossy().to_string())
            .chain(cmd.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn basename_ignores_host_separator_conventions() {
        assert_eq!(trace_basename(r"C:\captures\level1.trace"), "level1");
        assert_eq!(trace_basename("/home/me/captures/level1.trace"), "level1");
        assert_eq!(trace_basename(r"captures\\nested//deep\boss.trace"), "boss");
        assert_eq!(trace_basename("level1.trace"), "level1");
        assert_eq!(trace_basename("dir/"), "dir");
    }

    #[test]
    fn basename_only_strips_trailing_trace_extension() {
        assert_eq!(trace_basename("/tmp/my.trace.backup"), "my.trace.backup");
        assert_eq!(trace_basename("/tmp/game.trace.trace"), "game.trace");
    }

    #[test]
    fn raw_pass_pins_rate_and_size() {
        let spec = build_pipeline(&job("/captures/level1.trace"), &settings(), PassKind::Raw)
            .unwrap();

        assert_snapshot!(
            argv(&spec.consumer),
            @"/usr/bin/ffmpeg -r 60 -f image2pipe -vcodec ppm -i pipe: -r 60 -s 1920x1080 -vcodec libx264 -preset veryslow -qp 0 -y /renders/level1-uncompressed.mkv"
        );
        assert_eq!(spec.output_stem, PathBuf::from("/renders/level1-uncompressed"));
    }

    #[test]
    fn sample_pass_omits_output_size() {
        let spec = build_pipeline(&job("/captures/level1.trace"), &settings(), PassKind::Sample)
            .unwrap();

        assert_snapshot!(
            argv(&spec.consumer),
            @"/usr/bin/ffmpeg -r 60 -f image2pipe -vcodec ppm -i pipe: -vcodec mpeg4 -y /renders/level1-sample.avi"
        );
        assert!(!spec.consumer.args.contains(&"-s".to_string()));
    }

    #[test]
    fn producer_is_the_same_for_both_passes() {
        let job = job("/captures/level1.trace");
        let raw = build_pipeline(&job, &settings(), PassKind::Raw).unwrap();
        let sample = build_pipeline(&job, &settings(), PassKind::Sample).unwrap();

        assert_eq!(raw.producer, sample.producer);
        assert_eq!(
            argv(&raw.producer),
            "/opt/apitrace/bin/apitrace dump-images -o - /captures/level1.trace"
        );
    }

    #[test]
    fn windows_trace_path_names_both_outputs() {
        let job = job(r"C:\captures\level1.trace");
        let raw = build_pipeline(&job, &settings(), PassKind::Raw).unwrap();
        let sample = build_pipeline(&job, &settings(), PassKind::Sample).unwrap();

        assert_eq!(raw.consumer.args.last().unwrap(), "/renders/level1-uncompressed.mkv");
        assert_eq!(sample.consumer.args.last().unwrap(), "/renders/level1-sample.avi");
        // Trace path goes to the producer untouched
        assert_eq!(raw.producer.args.last().unwrap(), r"C:\captures\level1.trace");
    }

    #[test]
    fn quoted_output_with_spaces_stays_one_argument() {
        let mut job = job("/captures/level1.trace");
        job.output_dir = PathBuf::from("/my renders");
        let spec = build_pipeline(&job, &settings(), PassKind::Raw).unwrap();
        assert_eq!(
            spec.consumer.args.last().unwrap(),
            "/my renders/level1-uncompressed.mkv"
        );
    }

    #[test]
    fn missing_placeholder_is_a_config_error() {
        let mut settings = settings();
        settings.raw_args_template = "-vcodec libx264 -y out.mkv".to_string();

        let err = build_pipeline(&job("/captures/level1.trace"), &settings, PassKind::Raw)
            .unwrap_err();
        assert!(err.to_string().contains("{file}"));
        assert!(err.to_string().contains("uncompressed"));

        // Sample pass uses its own template and is unaffected
        assert!(build_pipeline(&job("/captures/level1.trace"), &settings, PassKind::Sample).is_ok());
    }

    #[test]
    fn unbalanced_quotes_are_a_config_error() {
        let mut settings = settings();
        settings.sample_args_template = r#"-vcodec mpeg4 -y "{file}.avi"#.to_string();

        let err = build_pipeline(&job("/captures/level1.trace"), &settings, PassKind::Sample)
            .unwrap_err();
        assert!(err.to_string().contains("unbalanced quotes"));
    }

    #[test]
    fn placeholder_substituted_inside_every_token() {
        let mut settings = settings();
        settings.raw_args_template = "-passlogfile {file}.log -y {file}.mkv".to_string();
        let spec = build_pipeline(&job("/captures/a.trace"), &settings, PassKind::Raw).unwrap();
        let tail: Vec<_> = spec.consumer.args.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                "-passlogfile",
                "/renders/a-uncompressed.log",
                "-y",
                "/renders/a-uncompressed.mkv"
            ]
        );
    }

    #[test]
    fn empty_basename_is_rejected() {
        let err = build_pipeline(&job(".trace"), &settings(), PassKind::Raw).unwrap_err();
        assert!(err.to_string().contains("output name"));
    }

    #[test]
    fn building_twice_gives_identical_specs() {
        let job = job(r"D:\traces\intro.trace");
        let first = build_pipeline(&job, &settings(), PassKind::Raw).unwrap();
        let second = build_pipeline(&job, &settings(), PassKind::Raw).unwrap();
        assert_eq!(first, second);
    }
}
