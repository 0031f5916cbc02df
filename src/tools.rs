//! External collaborators: ffprobe, ffmpeg and the glyph renderer.
//!
//! Every invocation is an explicit argument vector; nothing goes through a
//! shell. Per-frame calls take an optional timeout after which the child is
//! killed and the call reported as failed.

use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ToolConfig, VideoGeometry};
use crate::error::ToolError;
use crate::inventory::FramePattern;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn log_command(cmd: &Command) {
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    debug!("running {} {}", program_name(cmd), args.join(" "));
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_bounded(child: &mut Child, program: &str, timeout: Duration) -> Result<std::process::ExitStatus, ToolError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(ToolError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        }
    }
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A non-zero exit is an error carrying the tail of stderr.
pub fn run_tool(cmd: &mut Command, timeout: Option<Duration>) -> Result<Output, ToolError> {
    log_command(cmd);
    let program = program_name(cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        // On timeout the reader threads are left to finish on their own.
        Some(limit) => wait_bounded(&mut child, &program, limit)?,
        None => child.wait().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?,
    };

    let output = Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(ToolError::NonZeroExit {
            program,
            code: output.status.code().unwrap_or(-1),
            stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        });
    }
    Ok(output)
}

/// What ffprobe reports about the input.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Parse ffprobe's rational frame rate, e.g. `30000/1001`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.trim().parse().ok(),
    }
}

pub(crate) fn parse_probe(program: &str, json: &[u8]) -> Result<SourceInfo, ToolError> {
    let bad = |detail: String| ToolError::BadOutput {
        program: program.to_string(),
        detail,
    };
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| bad(format!("invalid json: {}", e)))?;
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| bad("no video stream".to_string()))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(bad("video stream has no dimensions".to_string())),
    };
    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    Ok(SourceInfo {
        width,
        height,
        fps,
        has_audio,
    })
}

pub fn probe(input: &Path, tools: &ToolConfig) -> Result<SourceInfo, ToolError> {
    let output = run_tool(
        Command::new(&tools.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("stream=codec_type,width,height,r_frame_rate")
            .arg("-of")
            .arg("json")
            .arg(input),
        None,
    )?;
    parse_probe(&tools.ffprobe, &output.stdout)
}

/// Extract grayscale PGM rasters already scaled to the output grid.
pub fn extract_frames(
    input: &Path,
    frames_dir: &Path,
    geometry: &VideoGeometry,
    fps: u32,
    tools: &ToolConfig,
) -> Result<(), ToolError> {
    let vf = format!(
        "fps={},scale={}:{},format=gray",
        fps, geometry.output_width, geometry.output_height
    );
    run_tool(
        Command::new(&tools.ffmpeg)
            .arg("-loglevel")
            .arg("error")
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(vf)
            .arg("-f")
            .arg("image2")
            .arg(frames_dir.join(FramePattern::raster().printf_pattern())),
        None,
    )?;
    Ok(())
}

pub fn extract_audio(input: &Path, out_audio: &Path, bitrate: &str, tools: &ToolConfig) -> Result<(), ToolError> {
    run_tool(
        Command::new(&tools.ffmpeg)
            .arg("-loglevel")
            .arg("error")
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(bitrate)
            .arg(out_audio),
        None,
    )?;
    Ok(())
}

/// Render one text frame to an image.
pub fn render_frame(text: &Path, image: &Path, tools: &ToolConfig, timeout: Option<Duration>) -> Result<(), ToolError> {
    let mut label = std::ffi::OsString::from("label:@");
    label.push(text);
    run_tool(
        Command::new(&tools.renderer)
            .arg("-background")
            .arg("black")
            .arg("-fill")
            .arg("white")
            .arg("-font")
            .arg(&tools.font)
            .arg("-pointsize")
            .arg(tools.point_size.to_string())
            .arg(label)
            .arg(image),
        timeout,
    )?;
    Ok(())
}

/// Write an ffconcat list showing each image for one frame interval.
/// Entries are file names relative to the list, which lives beside them.
pub fn write_concat_list(list_path: &Path, images: &[PathBuf], fps: u32) -> io::Result<()> {
    let mut file = File::create(list_path)?;
    writeln!(file, "ffconcat version 1.0")?;
    let duration = 1.0 / fps as f64;
    for image in images {
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().replace('\'', "'\\''"))
            .unwrap_or_default();
        writeln!(file, "file '{}'", name)?;
        writeln!(file, "duration {:.6}", duration)?;
    }
    // The concat demuxer ignores the duration of the final entry.
    if let Some(last) = images.last().and_then(|p| p.file_name()) {
        writeln!(file, "file '{}'", last.to_string_lossy().replace('\'', "'\\''"))?;
    }
    file.flush()
}

/// Encode the rendered images (and audio, if any) into the output video.
pub fn mux(
    concat_list: &Path,
    audio: Option<&Path>,
    fps: u32,
    bitrate: &str,
    output: &Path,
    tools: &ToolConfig,
) -> Result<(), ToolError> {
    let mut cmd = Command::new(&tools.ffmpeg);
    cmd.arg("-loglevel")
        .arg("error")
        .arg("-nostdin")
        .arg("-y")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(concat_list);
    if let Some(audio) = audio {
        cmd.arg("-i").arg(audio);
    }
    cmd.arg("-vf")
        .arg(format!("fps={},pad=ceil(iw/2)*2:ceil(ih/2)*2", fps))
        .arg("-c:v")
        .arg("libx264")
        .arg("-pix_fmt")
        .arg("yuv420p");
    if audio.is_some() {
        cmd.arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(bitrate)
            .arg("-shortest");
    }
    cmd.arg(output);
    run_tool(&mut cmd, None)?;
    Ok(())
}
