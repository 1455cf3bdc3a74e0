use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::{ConfigFile, GeoSource, Preset, RunConfig};

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Run the detector over a directory of images
    Detect(DetectArgs),
    /// Print counts over a directory of result files
    Summary {
        /// Directory holding <image_id>.json files
        #[arg(default_value = "outputs/detections")]
        dir: PathBuf,
        /// labels file naming detections stored without a label [default: COCO]
        #[arg(long)]
        labels: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Clone, Debug, Default)]
pub struct DetectArgs {
    /// Defaults bundle: baseline keeps every class, survey is the bird survey setup
    #[arg(long, value_enum)]
    pub preset: Option<Preset>,

    /// JSON config file applied on top of the preset
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// image directory
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// image extensions to pick up, e.g. --ext jpg --ext png
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// directory for <image_id>.json results
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// directory for <image_id>_debug.jpg renders
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,

    /// ONNX model path, URL or name
    #[arg(long)]
    pub model: Option<String>,

    /// labels file, one class name per line
    #[arg(long)]
    pub labels: Option<PathBuf>,

    #[arg(long)]
    pub cuda: bool,

    #[arg(long)]
    pub conf: Option<f32>,

    #[arg(long)]
    pub iou: Option<f32>,

    /// inference resolution in pixels
    #[arg(long)]
    pub imgsz: Option<u32>,

    #[arg(long)]
    pub max_det: Option<usize>,

    /// suppress overlaps across classes
    #[arg(long)]
    pub agnostic: Option<bool>,

    /// keep only these class ids, e.g. --classes 14,15
    #[arg(long, value_delimiter = ',', conflicts_with = "all_classes")]
    pub classes: Option<Vec<u32>>,

    /// disable any class filter from the preset or config file
    #[arg(long)]
    pub all_classes: bool,

    /// write the class label next to each class id
    #[arg(long)]
    pub with_labels: Option<bool>,

    /// write annotated debug images
    #[arg(long)]
    pub debug: Option<bool>,

    /// TTF font for debug captions
    #[arg(long)]
    pub font: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub geo: Option<GeoSource>,

    #[arg(long, allow_hyphen_values = true)]
    pub base_lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub base_lon: Option<f64>,

    #[arg(long)]
    pub jitter: Option<f64>,

    /// log and skip images that fail instead of stopping
    #[arg(long)]
    pub keep_going: bool,
}

impl DetectArgs {
    /// Preset, then config file, then flags.
    pub fn into_config(self) -> Result<RunConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let preset = self.preset.or(file.preset).unwrap_or_default();
        let mut config = RunConfig::from_preset(preset);
        config.merge(file);
        self.apply(&mut config);
        config.validate()?;
        config.inference.align_to_stride();
        Ok(config)
    }

    fn apply(self, config: &mut RunConfig) {
        if let Some(v) = self.input {
            config.input_dir = v;
        }
        if !self.extensions.is_empty() {
            config.extensions = self.extensions;
        }
        if let Some(v) = self.output {
            config.detections_dir = v;
        }
        if let Some(v) = self.debug_dir {
            config.debug_dir = v;
        }
        if let Some(v) = self.model {
            config.model = v;
        }
        if let Some(v) = self.labels {
            config.labels = Some(v);
        }
        config.cuda |= self.cuda;
        if let Some(v) = self.conf {
            config.inference.confidence_threshold = v;
        }
        if let Some(v) = self.iou {
            config.inference.iou_threshold = v;
        }
        if let Some(v) = self.imgsz {
            config.inference.inference_size = v;
        }
        if let Some(v) = self.max_det {
            config.inference.max_detections = v;
        }
        if let Some(v) = self.agnostic {
            config.inference.class_agnostic = v;
        }
        if self.all_classes {
            config.class_filter = None;
        } else if let Some(v) = self.classes {
            config.class_filter = Some(v);
        }
        if let Some(v) = self.with_labels {
            config.include_labels = v;
        }
        if let Some(v) = self.debug {
            config.debug.enabled = v;
        }
        if let Some(v) = self.font {
            config.debug.font = Some(v);
        }
        if let Some(v) = self.geo {
            config.geo.source = v;
        }
        if let Some(v) = self.base_lat {
            config.geo.base_lat = v;
        }
        if let Some(v) = self.base_lon {
            config.geo.base_lon = v;
        }
        if let Some(v) = self.jitter {
            config.geo.jitter = v;
        }
        config.keep_going |= self.keep_going;
    }
}
