//
// imbatch - CLI front-end exercising the batched image-ingest pipeline
//
// Copyright (c) 2018 Brion Vibber
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.
//

use std::io;
use std::io::{Error, ErrorKind};
use std::path::PathBuf;

extern crate clap;
use clap::{App, Arg, ArgMatches};

extern crate imbatch;
use imbatch::{BatchOutput, BrightnessMatrix, Config, CropLocation, Dispatcher, Packing, ResizeMode};

use std::time::Instant;

pub fn err(payload: &str) -> Error {
    Error::new(ErrorKind::InvalidInput, payload)
}

fn parse_floats(s: &str) -> io::Result<Vec<f32>> {
    s.split(',')
        .map(|piece| {
            piece
                .trim()
                .parse::<f32>()
                .map_err(|_| err(&format!("invalid number: {}", piece)))
        })
        .collect()
}

fn parse_resize(s: &str) -> io::Result<ResizeMode> {
    let values = parse_floats(s)?;
    match values.as_slice() {
        [side] => Ok(ResizeMode::ShortestSide(*side as u32)),
        [h, w] => Ok(ResizeMode::Fixed(*h as u32, *w as u32)),
        _ => Err(err("--resize takes either one value (shortest side) or two (H,W)")),
    }
}

fn parse_average(s: &str) -> io::Result<[f32; 3]> {
    let values = parse_floats(s)?;
    match values.as_slice() {
        [v] => Ok([*v; 3]),
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(err("--subtract-average takes one value or three")),
    }
}

fn parse_brightness(s: &str) -> io::Result<BrightnessMatrix> {
    let values = parse_floats(s)?;
    match values.as_slice() {
        [v] => Ok(BrightnessMatrix::scalar(*v)),
        [a, b, c] => Ok(BrightnessMatrix::diagonal([*a, *b, *c])),
        nine if nine.len() == 9 => {
            let mut m = [0.0f32; 9];
            m.copy_from_slice(nine);
            Ok(BrightnessMatrix(m))
        }
        _ => Err(err("--brightness takes one, three, or nine values")),
    }
}

fn parse_range(s: &str) -> io::Result<(f32, f32)> {
    let values = parse_floats(s)?;
    match values.as_slice() {
        [lo, hi] => Ok((*lo, *hi)),
        _ => Err(err("range option takes exactly two comma-separated values")),
    }
}

fn build_config(matches: &ArgMatches) -> io::Result<Config> {
    let mut config = Config::new();

    config
        .set_num_threads(
            matches
                .value_of("threads")
                .map(|s| s.parse::<usize>().unwrap_or(1))
                .unwrap_or(1),
        )
        .map_err(|e| err(&e.to_string()))?;

    config
        .set_prefetch(matches.is_present("prefetch"))
        .map_err(|e| err(&e.to_string()))?;

    if let Some(s) = matches.value_of("resize") {
        config.set_resize(parse_resize(s)?).map_err(|e| err(&e.to_string()))?;
    }

    config
        .set_packing(if matches.is_present("pack") {
            Packing::Packed
        } else {
            Packing::Individual
        })
        .map_err(|e| err(&e.to_string()))?;

    config.set_gpu(matches.is_present("gpu")).map_err(|e| err(&e.to_string()))?;

    if let Some(s) = matches.value_of("subtract-average") {
        config
            .set_subtract_average(parse_average(s)?)
            .map_err(|e| err(&e.to_string()))?;
    }

    if let Some(s) = matches.value_of("brightness") {
        config
            .set_brightness(parse_brightness(s)?)
            .map_err(|e| err(&e.to_string()))?;
    }

    if let Some(s) = matches.value_of("contrast") {
        let v = s.parse::<f32>().map_err(|_| err("invalid --contrast value"))?;
        config.set_contrast(v).map_err(|e| err(&e.to_string()))?;
    }

    if let Some(s) = matches.value_of("saturation") {
        let v = s.parse::<f32>().map_err(|_| err("invalid --saturation value"))?;
        config.set_saturation(v).map_err(|e| err(&e.to_string()))?;
    }

    if let Some(s) = matches.value_of("crop-anisotropy") {
        let (min, max) = parse_range(s)?;
        config
            .set_crop_anisotropy(min, max)
            .map_err(|e| err(&e.to_string()))?;
    }

    if let Some(s) = matches.value_of("crop-size") {
        let (min, max) = parse_range(s)?;
        config.set_crop_size(min, max).map_err(|e| err(&e.to_string()))?;
    }

    let location = match matches.value_of("crop-location") {
        None | Some("center") => CropLocation::Center,
        Some("random") => CropLocation::Random,
        Some(other) => return Err(err(&format!("unknown crop-location {}", other))),
    };
    config.set_crop_location(location).map_err(|e| err(&e.to_string()))?;

    config.set_flip(matches.is_present("flip")).map_err(|e| err(&e.to_string()))?;

    let verbose = matches.occurrences_of("verbose") as u8;
    config.set_verbose(verbose).map_err(|e| err(&e.to_string()))?;

    if let Some(s) = matches.value_of("seed") {
        let seed = s.parse::<u64>().map_err(|_| err("invalid --seed value"))?;
        config.set_seed(Some(seed)).map_err(|e| err(&e.to_string()))?;
    }

    Ok(config)
}

fn init_logging(verbose: u64) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .try_init()
        .ok();
}

fn doit(matches: ArgMatches) -> io::Result<()> {
    let config = build_config(&matches)?;

    let filenames: Vec<PathBuf> = matches
        .values_of("filenames")
        .ok_or_else(|| err("at least one filename is required"))?
        .map(PathBuf::from)
        .collect();

    let reps = matches
        .value_of("repeat")
        .map(|s| s.parse::<usize>().unwrap_or(1))
        .unwrap_or(1);

    let mut dispatcher = Dispatcher::with_image_io();

    for _ in 0..reps {
        let start = Instant::now();
        let output = dispatcher
            .call(config.clone(), &filenames)
            .map_err(|e| err(&e.to_string()))?;
        let elapsed = start.elapsed();

        match output {
            None => println!("prefetch issued ({} file(s))", filenames.len()),
            Some(BatchOutput::Packed { shape, results, .. }) => {
                println!(
                    "packed batch ready: shape={:?}, {} item(s), {} ms",
                    shape,
                    results.len(),
                    elapsed.as_millis()
                );
                for r in &results {
                    if let Some(e) = &r.error {
                        eprintln!("warning: {:?}: {}", r.name, e);
                    }
                }
            }
            Some(BatchOutput::Individual(results)) => {
                println!(
                    "individual batch ready: {} item(s), {} ms",
                    results.len(),
                    elapsed.as_millis()
                );
                for r in &results {
                    match &r.error {
                        Some(e) => eprintln!("warning: {:?}: {}", r.name, e),
                        None => {
                            if let Some(shape) = r.shape {
                                println!("  {:?}: {:?}", r.name, shape);
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

pub fn main() {
    let matches = App::new("imbatch")
        .version("0.1.0")
        .author("Brooke Vibber <bvibber@pobox.com>")
        .about("Decodes, resizes, crops and color-augments a batch of image files using a persistent worker pool.")
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("n")
                .help("Number of persistent worker threads (coerced up to 1)."),
        )
        .arg(
            Arg::with_name("prefetch")
                .long("prefetch")
                .help("Kick off decode/augment and return immediately, without waiting."),
        )
        .arg(
            Arg::with_name("resize")
                .long("resize")
                .value_name("S|H,W")
                .help("Shortest-side resize to S, or fixed resize to H,W."),
        )
        .arg(
            Arg::with_name("pack")
                .long("pack")
                .help("Emit a single (H,W,3,N) tensor instead of one tensor per item."),
        )
        .arg(
            Arg::with_name("gpu")
                .long("gpu")
                .help("Copy outputs to device memory after decode."),
        )
        .arg(
            Arg::with_name("subtract-average")
                .long("subtract-average")
                .value_name("a,b,c")
                .help("Per-channel mean to subtract."),
        )
        .arg(
            Arg::with_name("brightness")
                .long("brightness")
                .value_name("scalar|3|9")
                .help("Brightness deviation: scalar, 3-vector diagonal, or full 3x3 matrix."),
        )
        .arg(
            Arg::with_name("contrast")
                .long("contrast")
                .value_name("0..1")
                .help("Contrast deviation."),
        )
        .arg(
            Arg::with_name("saturation")
                .long("saturation")
                .value_name("0..1")
                .help("Saturation deviation."),
        )
        .arg(
            Arg::with_name("crop-anisotropy")
                .long("crop-anisotropy")
                .value_name("min,max")
                .help("Aspect sampling range for the random crop."),
        )
        .arg(
            Arg::with_name("crop-size")
                .long("crop-size")
                .value_name("min,max")
                .help("Relative crop-size range, within [0,1]."),
        )
        .arg(
            Arg::with_name("crop-location")
                .long("crop-location")
                .value_name("center|random")
                .help("Crop placement policy."),
        )
        .arg(Arg::with_name("flip").long("flip").help("Enable 50/50 horizontal flip."))
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("u64")
                .help("Pin the per-batch RNG seed for reproducible augmentation."),
        )
        .arg(
            Arg::with_name("repeat")
                .long("repeat")
                .value_name("n")
                .help("Run the same filename list through the dispatcher n times, as a reuse/benchmark helper."),
        )
        .arg(
            Arg::with_name("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("Increase log verbosity (repeatable)."),
        )
        .arg(
            Arg::with_name("filenames")
                .help("Image files to load.")
                .required(true)
                .multiple_values(true)
                .index(1),
        )
        .get_matches();

    init_logging(matches.occurrences_of("verbose"));

    match doit(matches) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
