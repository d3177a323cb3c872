use std::convert::TryFrom;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use serde::Serialize;

use haarsig::{Match, Signature, SimilarityIndex, SketchMode};

#[derive(Parser, Debug)]
#[command(name = "haarsig", version, about = "Wavelet signature image similarity search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every image matching a glob pattern
    Index {
        /// Glob pattern of images to index
        #[arg(short, long)]
        glob: String,
        /// Index file to write
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        /// Index at most this many images
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find the images most similar to one image
    Query {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
        /// Score with the sketch weight profile
        #[arg(long)]
        sketch: bool,
        /// Do not blur the query image before scaling
        #[arg(long)]
        no_blur: bool,
        image: PathBuf,
    },

    /// Group indexed images into similarity clusters
    Cluster {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        /// Scores below this join a cluster
        #[arg(long, allow_hyphen_values = true)]
        threshold: f64,
        /// Compare channel averages only
        #[arg(long)]
        fast: bool,
    },

    /// Re-query a random sample of indexed images and report how often
    /// each finds itself
    Eval {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        #[arg(long, default_value_t = 100)]
        samples: usize,
    },

    /// Answer POSTed images over HTTP with a JSON list of matches
    Serve {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        #[arg(long, default_value = "0.0.0.0:1080")]
        addr: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
}

#[derive(Serialize)]
struct Hit<'a> {
    #[serde(flatten)]
    result: Match,
    path: &'a str,
}

/// Ids are line numbers in the list stored next to the index.
fn paths_file(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_owned();
    name.push(".paths");
    PathBuf::from(name)
}

fn open(db: &Path) -> Result<(SimilarityIndex, Vec<String>)> {
    let mut index = SimilarityIndex::new();
    index
        .load(db)
        .with_context(|| format!("Failed to load index {:?}", db))?;
    let list = paths_file(db);
    let paths = fs::read_to_string(&list)
        .with_context(|| format!("Failed to read path list {:?}", list))?
        .lines()
        .map(str::to_owned)
        .collect();
    Ok((index, paths))
}

fn path_of(paths: &[String], id: i64) -> &str {
    usize::try_from(id)
        .ok()
        .and_then(|i| paths.get(i))
        .map(String::as_str)
        .unwrap_or("?")
}

fn index_images(pattern: &str, db: &Path, limit: Option<usize>) -> Result<()> {
    let mut imgs = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("Bad glob pattern {:?}", pattern))? {
        imgs.push(entry?);
    }
    imgs.sort();
    if let Some(limit) = limit {
        imgs.truncate(limit);
    }

    let mut index = SimilarityIndex::new();
    let mut paths = Vec::with_capacity(imgs.len());
    let mut pb = pbr::ProgressBar::new(imgs.len() as u64);
    for img in &imgs {
        match Signature::from_path(paths.len() as i64, img, false) {
            Ok(sig) => {
                index.insert(sig)?;
                paths.push(img.to_string_lossy().into_owned());
            }
            Err(e) => warn!("Skipping {}: {}", img.display(), e),
        }
        pb.inc();
    }
    pb.finish();

    index
        .save(db)
        .with_context(|| format!("Failed to save index {:?}", db))?;
    let list = paths_file(db);
    fs::write(&list, paths.join("\n")).with_context(|| format!("Failed to write {:?}", list))?;
    info!("Indexed {} of {} images", paths.len(), imgs.len());
    Ok(())
}

fn query(db: &Path, image: &Path, k: usize, mode: SketchMode, blur: bool) -> Result<()> {
    let (index, paths) = open(db)?;
    let sig = Signature::from_path(-1, image, blur)
        .with_context(|| format!("Failed to read {:?}", image))?;
    for hit in index.query(&sig, k, mode) {
        println!("{:>10.4}  {}", hit.score, path_of(&paths, hit.id));
    }
    Ok(())
}

fn cluster(db: &Path, threshold: f64, fast: bool) -> Result<()> {
    let (index, paths) = open(db)?;
    let clusters = index.cluster_by_similarity(threshold, fast);
    if clusters.is_empty() {
        println!("No clusters found.");
    }
    for (i, group) in clusters.iter().enumerate() {
        println!("Cluster {}:", i + 1);
        for id in group {
            println!("   {}", path_of(&paths, *id));
        }
    }
    Ok(())
}

fn eval(db: &Path, samples: usize) -> Result<()> {
    let (index, paths) = open(db)?;
    let mut ids: Vec<i64> = index.ids().collect();
    ids.shuffle(&mut rand::thread_rng());
    ids.truncate(samples);
    if ids.is_empty() {
        return Err(anyhow!("Index {:?} is empty", db));
    }

    let mut scores = 0.0;
    for &id in &ids {
        let path = path_of(&paths, id);
        let sig = Signature::from_path(-1, path, true).with_context(|| format!("Failed to read {}", path))?;
        let mut score = 1.0;
        for hit in index.query(&sig, 5, SketchMode::Photo) {
            if hit.id == id {
                break;
            }
            score /= 2.0;
        }
        if score != 1.0 {
            println!("incorrect: {}, {}", path, score);
        }
        scores += score;
    }
    println!("Avg Score: {}", scores / ids.len() as f64);
    Ok(())
}

fn serve(db: &Path, addr: &str, k: usize) -> Result<()> {
    let (index, paths) = open(db)?;
    let server = tiny_http::Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("Listening on {}", addr);

    loop {
        let mut request = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                error!("error: {}", e);
                break;
            }
        };
        let mut buf = Vec::new();
        if let Err(e) = request.as_reader().read_to_end(&mut buf) {
            warn!("Failed to read request body: {}", e);
            continue;
        }

        let response = match Signature::from_image_bytes(-1, &buf, true) {
            Ok(sig) => {
                let hits: Vec<Hit> = index
                    .query(&sig, k, SketchMode::Photo)
                    .into_iter()
                    .map(|result| Hit {
                        result,
                        path: path_of(&paths, result.id),
                    })
                    .collect();
                match serde_json::to_string(&hits) {
                    Ok(body) => tiny_http::Response::from_string(body),
                    Err(e) => {
                        error!("Failed to encode results: {}", e);
                        tiny_http::Response::from_string(e.to_string()).with_status_code(500)
                    }
                }
            }
            Err(e) => {
                warn!("Rejected query: {}", e);
                tiny_http::Response::from_string(e.to_string()).with_status_code(400)
            }
        };
        if let Err(e) = request.respond(response) {
            warn!("Failed to send response: {}", e);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Index { glob, db, limit } => index_images(&glob, &db, limit),
        Command::Query {
            db,
            k,
            sketch,
            no_blur,
            image,
        } => {
            let mode = if sketch { SketchMode::Sketch } else { SketchMode::Photo };
            query(&db, &image, k, mode, !no_blur)
        }
        Command::Cluster { db, threshold, fast } => cluster(&db, threshold, fast),
        Command::Eval { db, samples } => eval(&db, samples),
        Command::Serve { db, addr, k } => serve(&db, &addr, k),
    }
}
