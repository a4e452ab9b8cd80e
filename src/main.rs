//! asi-capture command line: list cameras, inspect and set controls, capture
//! one frame to TIFF or FITS.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use tracing::{debug, info};

use asi_capture::capture::CaptureConfig;
use asi_capture::controls::{apply_assignments, parse_assignments, read_control, try_apply_exposure};
use asi_capture::logging::{self, LogConfig, Verbosity};
use asi_capture::traits::{CameraControl, CameraError, CameraInfo, Result};
use asi_capture::{
    list_devices, persist, CaptureSession, OutputKind, PixelFormat, RoiFormat, V4L2Device,
};

#[derive(Debug, Parser)]
#[command(name = "asi-capture", version, about, disable_help_flag = true)]
struct Args {
    /// List properties of connected cameras
    #[arg(short, long)]
    list: bool,

    /// List capabilities and values of the camera's controls
    #[arg(short = 'p', long)]
    capabilities: bool,

    /// Set control values, e.g. "gain=120,exposure=auto"
    #[arg(short, long, value_name = "PARAM=VAL")]
    set: Option<String>,

    /// Get the value of one control
    #[arg(short, long, value_name = "PARAM")]
    get: Option<String>,

    /// Start a single image capture
    #[arg(short, long)]
    capture: bool,

    /// Exposure time in seconds
    #[arg(short, long, default_value_t = 0.01, value_parser = parse_exposure)]
    exposure: f64,

    /// Image width
    #[arg(short, long, default_value_t = 640)]
    width: u32,

    /// Image height
    #[arg(short = 'h', long, default_value_t = 480)]
    height: u32,

    /// Pixel binning
    #[arg(short, long, default_value_t = 1)]
    binning: u32,

    /// Image type {RAW8, RAW16, RGB24, Y8}
    #[arg(
        short = 't',
        long = "type",
        default_value_t = PixelFormat::Raw8,
        value_parser = parse_format
    )]
    image_type: PixelFormat,

    /// TIFF (.tif, .tiff) or FITS (.fit, .fits) file for the captured frame
    #[arg(short, long)]
    filename: Option<PathBuf>,

    /// Physical pixel size in microns, "X" or "X,Y", recorded in the output header
    #[arg(long, value_name = "UM[,UM]", value_parser = parse_pixel_size)]
    pixel_size: Option<[f64; 2]>,

    /// Verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Message)]
    verbose: Verbosity,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Camera id (N of /dev/videoN)
    #[arg(default_value_t = 0)]
    camera_id: u32,
}

fn parse_exposure(text: &str) -> std::result::Result<f64, String> {
    let seconds: f64 = text
        .parse()
        .map_err(|err| format!("invalid exposure '{text}': {err}"))?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(format!("exposure must be a non-negative number of seconds, got {text}"))
    }
}

fn parse_pixel_size(text: &str) -> std::result::Result<[f64; 2], String> {
    let parse = |part: &str| -> std::result::Result<f64, String> {
        let um: f64 = part
            .trim()
            .parse()
            .map_err(|err| format!("invalid pixel size '{part}': {err}"))?;
        if um.is_finite() && um > 0.0 {
            Ok(um)
        } else {
            Err(format!("pixel size must be positive, got {part}"))
        }
    };

    match text.split_once(',') {
        Some((x, y)) => Ok([parse(x)?, parse(y)?]),
        None => parse(text).map(|um| [um, um]),
    }
}

fn parse_format(text: &str) -> std::result::Result<PixelFormat, String> {
    text.parse::<PixelFormat>().map_err(|err| err.to_string())
}

fn main() {
    let args = Args::parse();
    logging::init(&LogConfig::new(args.verbose));

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let output = capture_target(args)?;

    if args.list {
        print_devices();
        if !has_camera_action(args) {
            return Ok(());
        }
    }

    let mut device = V4L2Device::open(args.camera_id)?;
    if let Some([x_um, y_um]) = args.pixel_size {
        device = device.with_pixel_size(x_um, y_um);
    }
    debug!(camera = args.camera_id, name = %device.info().name, "camera opened");

    if args.exposure > 0.0 {
        let exposure = Duration::try_from_secs_f64(args.exposure).map_err(|_| {
            CameraError::InvalidControlValue {
                name: "exposure".to_owned(),
                value: args.exposure.to_string(),
            }
        })?;
        try_apply_exposure(&mut device, exposure)?;
    }

    if args.capabilities {
        print_capabilities(&device)?;
    }

    if let Some(batch) = &args.set {
        let assignments = parse_assignments(batch)?;
        for assignment in &assignments {
            info!(control = %assignment.name, value = %assignment.value, "set control");
        }
        apply_assignments(&mut device, &assignments)?;
    }

    if let Some(name) = &args.get {
        let (id, value) = read_control(&device, name)?;
        println!("{id} {} {}", value.value, if value.auto { "true" } else { "false" });
    }

    if let Some((path, kind)) = output {
        let config = CaptureConfig {
            roi: RoiFormat::new(args.width, args.height, args.binning, args.image_type),
            ..CaptureConfig::default()
        };
        let frame = CaptureSession::new(config).capture(&mut device)?;
        persist(frame, kind, &path)?;
    }

    Ok(())
}

/// Resolve the output container before touching the camera.
fn capture_target(args: &Args) -> Result<Option<(PathBuf, OutputKind)>> {
    if !args.capture {
        return Ok(None);
    }
    let Some(path) = &args.filename else {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "missing output filename")
            .exit();
    };
    let kind = OutputKind::from_path(path)?;
    Ok(Some((path.clone(), kind)))
}

const fn has_camera_action(args: &Args) -> bool {
    args.capabilities || args.set.is_some() || args.get.is_some() || args.capture
}

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("no cameras found");
        return;
    }

    for summary in devices {
        let Ok(index) = u32::try_from(summary.index) else {
            continue;
        };
        println!("camera id     : {index}");
        println!("device        : {}", summary.path.display());
        match V4L2Device::open(index) {
            Ok(device) => print_info(device.info()),
            Err(err) => println!("name          : {} ({err})", summary.name),
        }
    }
}

const fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn print_info(info: &CameraInfo) {
    let formats: Vec<&str> = info.formats.iter().map(|f| f.name()).collect();
    let pixel_size = info.pixel_size_um.map_or_else(
        || "unknown".to_owned(),
        |[x, y]| format!("{x:.3} x {y:.3}"),
    );

    println!("name          : {}", info.name);
    println!("driver        : {}", info.driver);
    println!("bus           : {}", info.bus_info);
    println!("max width     : {}", info.max_width);
    println!("max height    : {}", info.max_height);
    println!("color         : {}", yes_no(info.is_color));
    println!("pixel size    : {pixel_size}");
    println!("image type    : {}", formats.join(" "));
}

fn print_capabilities<C: CameraControl>(device: &C) -> Result<()> {
    println!(
        "| {:<24}| {:<40}| {:<12}| {:<12}| {:<14}| {:<17}| {:<8} |",
        "name", "description", "max value", "min value", "default value", "support auto set", "writable"
    );
    for control in device.controls()? {
        println!(
            "| {:<24}| {:<40}| {:<12}| {:<12}| {:<14}| {:<17}| {:<8} |",
            control.name,
            control.description,
            control.max,
            control.min,
            control.default,
            yes_no(control.auto_supported),
            yes_no(control.writable)
        );
    }
    Ok(())
}
