use std::convert::TryFrom;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, warn};

use crate::error::PageError;
use crate::page::{PageRef, Size};
use crate::source::PageSource;

const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Turn raw page bytes into a bitmap at native resolution.
pub struct DecodeJob {
    pub generation: u64,
    pub index: usize,
    pub page: PageRef,
    pub source: Arc<dyn PageSource>,
}

/// Rescale an already decoded bitmap to `target`.
pub struct ResizeJob {
    pub generation: u64,
    pub index: usize,
    pub image: Arc<DynamicImage>,
    pub target: Size,
}

enum Job {
    Decode(DecodeJob),
    Resize(ResizeJob),
}

/// Replies are keyed by document generation and page index; the receiver
/// decides whether they are still wanted.
#[derive(Debug)]
pub enum WorkerReply {
    ImageReady {
        generation: u64,
        index: usize,
        result: Result<DynamicImage, PageError>,
    },
    ImageResized {
        generation: u64,
        index: usize,
        target: Size,
        result: Result<DynamicImage, PageError>,
    },
}

impl WorkerReply {
    pub fn generation(&self) -> u64 {
        match self {
            WorkerReply::ImageReady { generation, .. }
            | WorkerReply::ImageResized { generation, .. } => *generation,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            WorkerReply::ImageReady { index, .. } | WorkerReply::ImageResized { index, .. } => {
                *index
            }
        }
    }
}

/// Non-blocking decode/resize pipeline consumed by the pager.
pub trait ImagePipeline {
    fn decode(&self, job: DecodeJob) -> Result<(), PageError>;
    fn resize(&self, job: ResizeJob) -> Result<(), PageError>;
    fn try_recv(&self) -> Option<WorkerReply>;
    fn recv_timeout(&self, timeout: Duration) -> Option<WorkerReply>;
}

/// A small fixed pool of threads decoding and resizing page images.
#[derive(Debug)]
pub struct ImageWorker {
    job_tx: Sender<Job>,
    result_rx: Receiver<WorkerReply>,
    threads: usize,
}

impl ImageWorker {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<WorkerReply>();
        for worker_idx in 0..threads {
            let worker_rx = job_rx.clone();
            let worker_tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("page-worker-{worker_idx}"))
                .spawn(move || run_worker(worker_rx, worker_tx))
                .context("failed to spawn page worker thread")?;
        }
        debug!("started {threads} page worker thread(s)");
        Ok(Self {
            job_tx,
            result_rx,
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    fn submit(&self, job: Job) -> Result<(), PageError> {
        self.job_tx.send(job).map_err(|_| PageError::Disconnected)
    }
}

impl ImagePipeline for ImageWorker {
    fn decode(&self, job: DecodeJob) -> Result<(), PageError> {
        self.submit(Job::Decode(job))
    }

    fn resize(&self, job: ResizeJob) -> Result<(), PageError> {
        self.submit(Job::Resize(job))
    }

    fn try_recv(&self) -> Option<WorkerReply> {
        self.result_rx.try_recv().ok()
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<WorkerReply> {
        self.result_rx.recv_timeout(timeout).ok()
    }
}

fn run_worker(job_rx: Receiver<Job>, result_tx: Sender<WorkerReply>) {
    while let Ok(job) = job_rx.recv() {
        let reply = match job {
            Job::Decode(job) => run_decode(job),
            Job::Resize(job) => run_resize(job),
        };
        if result_tx.send(reply).is_err() {
            break;
        }
    }
}

pub fn run_decode(job: DecodeJob) -> WorkerReply {
    let result = decode_page(job.source.as_ref(), &job.page);
    if let Err(err) = &result {
        warn!("page {}: {err}", job.index);
    }
    WorkerReply::ImageReady {
        generation: job.generation,
        index: job.index,
        result,
    }
}

pub fn run_resize(job: ResizeJob) -> WorkerReply {
    let result = resize_image(&job.image, job.target, job.index);
    if let Err(err) = &result {
        warn!("page {}: {err}", job.index);
    }
    WorkerReply::ImageResized {
        generation: job.generation,
        index: job.index,
        target: job.target,
        result,
    }
}

/// Reads and decodes one page, applying its EXIF orientation.
pub fn decode_page(source: &dyn PageSource, page: &PageRef) -> Result<DynamicImage, PageError> {
    let bytes = source.read_bytes(page).map_err(|err| PageError::Read {
        page: page.to_string(),
        reason: format!("{err:#}"),
    })?;
    let image = image::load_from_memory(&bytes).map_err(|err| PageError::Decode {
        page: page.to_string(),
        reason: err.to_string(),
    })?;
    Ok(adjust_orientation(image, &bytes))
}

/// Aspect-preserving rescale to exactly `target`.
pub fn resize_image(
    image: &DynamicImage,
    target: Size,
    index: usize,
) -> Result<DynamicImage, PageError> {
    if target.is_empty() {
        return Err(PageError::EmptyTarget {
            index,
            width: target.width,
            height: target.height,
        });
    }
    if Size::of(image) == target {
        return Ok(image.clone());
    }
    Ok(image.resize_exact(target.width, target.height, RESIZE_FILTER))
}

fn orientation_from_tag_value(value: &rexif::TagValue) -> Option<u16> {
    let raw = match value {
        rexif::TagValue::U16(vals) => vals.first().copied(),
        rexif::TagValue::I16(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::U8(vals) => vals.first().map(|&v| v as u16),
        rexif::TagValue::U32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::I32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        _ => None,
    }?;
    (1..=8).contains(&raw).then_some(raw)
}

fn adjust_orientation(image: DynamicImage, bytes: &[u8]) -> DynamicImage {
    let Ok(exif) = rexif::parse_buffer_quiet(bytes).0 else {
        return image;
    };
    let code = exif
        .entries
        .iter()
        .find(|entry| entry.tag == rexif::ExifTag::Orientation)
        .and_then(|entry| orientation_from_tag_value(&entry.value));
    match code {
        Some(2) => image.fliph(),
        Some(3) => image.rotate180(),
        Some(4) => image.flipv(),
        Some(5) => image.rotate90().fliph(),
        Some(6) => image.rotate90(),
        Some(7) => image.rotate270().fliph(),
        Some(8) => image.rotate270(),
        _ => image,
    }
}
