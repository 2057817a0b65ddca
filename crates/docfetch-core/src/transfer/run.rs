//! Blocking single-stream GET with libcurl, writing into the partial file.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use curl::easy::{Easy, List};
use tokio::sync::mpsc;

use super::head::{self, ContentRange};
use super::partial::{self, PartialFile};
use super::progress::{ProgressSample, ProgressThrottle};
use super::{TransferOptions, TransferOutcome, TransferReport};
use crate::control::StopSignal;
use crate::retry::TransferError;
use crate::source::{RequestSpec, ResponseCheck, ResponseHead, SourceAdapter};

pub(super) struct BlockingJob {
    pub request: RequestSpec,
    pub adapter: Arc<dyn SourceAdapter>,
    pub partial: PathBuf,
    pub destination: PathBuf,
    pub resume_token: Option<String>,
    pub known_total: Option<u64>,
    pub options: TransferOptions,
    pub stop: StopSignal,
    pub progress: mpsc::Sender<ProgressSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// No body byte seen yet; head not judged.
    Pending,
    Write,
    /// 416 confirming the partial file already holds the whole document.
    AlreadyComplete,
    Abort,
}

struct Sink<'a> {
    job: &'a BlockingJob,
    offset: u64,
    resuming: bool,
    head: ResponseHead,
    verdict: Verdict,
    file: Option<PartialFile>,
    total: Option<u64>,
    token: Option<String>,
    error: Option<TransferError>,
    throttle: ProgressThrottle,
}

impl<'a> Sink<'a> {
    fn on_header(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(status) = head::parse_status_line(line) {
            // New response (redirect hop or 100-continue): start over.
            self.head = ResponseHead {
                status,
                headers: Vec::new(),
            };
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            self.head
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    fn decide(&mut self) {
        if self.verdict != Verdict::Pending {
            return;
        }
        self.verdict = match self.evaluate() {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                Verdict::Abort
            }
        };
    }

    fn evaluate(&mut self) -> Result<Verdict, TransferError> {
        match self.job.adapter.validate_response(&self.head) {
            ResponseCheck::Proceed => {}
            ResponseCheck::CredentialsRequired => return Err(TransferError::CredentialsRequired),
            ResponseCheck::Reject(reason) => return Err(TransferError::Rejected(reason)),
        }

        let status = self.head.status;
        let range = self
            .head
            .header("content-range")
            .and_then(head::parse_content_range);
        match status {
            206 => match range {
                Some(ContentRange::Bytes { start, total, .. })
                    if self.resuming && start == self.offset =>
                {
                    self.file = Some(PartialFile::append(&self.job.partial, self.offset)?);
                    self.total = total.or(self.total);
                    if let Some(token) = head::resume_token(&self.head) {
                        self.token = Some(token);
                    }
                    Ok(Verdict::Write)
                }
                _ => Err(TransferError::UnexpectedRange(
                    self.head
                        .header("content-range")
                        .unwrap_or("<missing>")
                        .to_string(),
                )),
            },
            200..=299 => {
                if self.resuming {
                    tracing::debug!(
                        url = %self.job.request.url,
                        "validator no longer matches; restarting from byte 0"
                    );
                }
                self.file = Some(PartialFile::create(&self.job.partial)?);
                self.total = head::content_length(&self.head);
                self.token = head::resume_token(&self.head);
                Ok(Verdict::Write)
            }
            416 if self.resuming => match range {
                Some(ContentRange::Unsatisfied { total }) if total == self.offset => {
                    self.total = Some(total);
                    Ok(Verdict::AlreadyComplete)
                }
                _ => Err(TransferError::Http(416)),
            },
            _ => Err(TransferError::Http(status)),
        }
    }

    /// Write callback body. Returning less than `data.len()` aborts the transfer.
    fn on_body(&mut self, data: &[u8]) -> usize {
        if self.job.stop.is_stopped() {
            return 0;
        }
        self.decide();
        match self.verdict {
            Verdict::Write => {}
            Verdict::AlreadyComplete => return data.len(),
            Verdict::Pending | Verdict::Abort => return 0,
        }
        let Some(file) = self.file.as_mut() else {
            return 0;
        };
        if let Err(e) = file.write(data) {
            self.error = Some(TransferError::Storage(e));
            return 0;
        }
        let written = file.len();
        if self.throttle.should_report(written, Instant::now()) {
            // Dropped samples are fine: the final counters travel in the report.
            let _ = self.job.progress.try_send(ProgressSample {
                bytes_downloaded: written,
                bytes_total: self.total,
                resume_token: self.token.clone(),
            });
        }
        data.len()
    }

    fn bytes_on_disk(&self) -> u64 {
        match &self.file {
            Some(file) => file.len(),
            None => self.offset,
        }
    }

    fn report(&mut self, outcome: TransferOutcome) -> TransferReport {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!(path = %self.job.partial.display(), error = %e, "flush partial file failed");
            }
        }
        TransferReport {
            outcome,
            bytes_downloaded: self.bytes_on_disk(),
            bytes_total: self.total,
            resume_token: self.token.clone(),
        }
    }

    fn finish(mut self) -> TransferReport {
        let written = self.bytes_on_disk();
        if let Some(total) = self.total {
            if written != total {
                return self.report(TransferOutcome::Failed(TransferError::IntegrityMismatch {
                    expected: total,
                    received: written,
                }));
            }
        }
        let finalized = match self.file.take() {
            Some(file) => file.finalize(&self.job.destination),
            None => partial::finalize_path(&self.job.partial, &self.job.destination),
        };
        let outcome = match finalized {
            Ok(()) => TransferOutcome::Completed,
            Err(e) => TransferOutcome::Failed(TransferError::Storage(e)),
        };
        TransferReport {
            outcome,
            bytes_downloaded: written,
            bytes_total: Some(self.total.unwrap_or(written)),
            resume_token: self.token.clone(),
        }
    }
}

fn configure(easy: &mut Easy, job: &BlockingJob, offset: u64, resuming: bool) -> Result<(), curl::Error> {
    let opts = &job.options;
    easy.url(&job.request.url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.timeout(opts.timeout)?;
    easy.buffer_size(opts.chunk_size)?;
    easy.useragent(&job.request.user_agent)?;
    easy.progress(true)?;

    let mut list = List::new();
    for (name, value) in &job.request.headers {
        list.append(&format!("{}: {}", name.trim(), value.trim()))?;
    }
    if resuming {
        easy.range(&format!("{offset}-"))?;
        if let Some(token) = &job.resume_token {
            list.append(&format!("If-Range: {token}"))?;
        }
    }
    easy.http_headers(list)?;

    if let Some((user, pass)) = &job.request.basic_auth {
        easy.username(user)?;
        easy.password(pass)?;
    }
    Ok(())
}

/// Run the attempt to completion, failure or stop. Never panics on I/O errors.
pub(super) fn download(job: BlockingJob) -> TransferReport {
    let offset = partial::existing_len(&job.partial);
    let resuming = offset > 0 && job.resume_token.is_some();
    let sink = RefCell::new(Sink {
        job: &job,
        offset,
        resuming,
        head: ResponseHead::default(),
        verdict: Verdict::Pending,
        file: None,
        total: job.known_total,
        token: job.resume_token.clone(),
        error: None,
        throttle: ProgressThrottle::new(
            job.options.progress_bytes_threshold,
            job.options.progress_interval,
            offset,
            Instant::now(),
        ),
    });
    if resuming {
        tracing::debug!(url = %job.request.url, offset, "resuming from partial file");
    }

    let mut easy = Easy::new();
    if let Err(e) = configure(&mut easy, &job, offset, resuming) {
        return sink.into_inner().report(TransferOutcome::Failed(TransferError::Curl(e)));
    }

    let performed = (|| -> Result<(), curl::Error> {
        let mut transfer = easy.transfer();
        transfer.header_function(|raw| {
            sink.borrow_mut().on_header(raw);
            true
        })?;
        transfer.write_function(|data| Ok(sink.borrow_mut().on_body(data)))?;
        transfer.progress_function(|_, _, _, _| !job.stop.is_stopped())?;
        transfer.perform()
    })();

    let mut sink = sink.into_inner();
    if let Some(reason) = job.stop.reason() {
        return sink.report(TransferOutcome::Stopped(reason));
    }
    if let Err(e) = performed {
        if let Some(err) = sink.error.take() {
            return sink.report(TransferOutcome::Failed(err));
        }
        if sink.verdict != Verdict::AlreadyComplete {
            return sink.report(TransferOutcome::Failed(TransferError::Curl(e)));
        }
    }

    // Responses without a body never reached the write callback.
    sink.decide();
    if let Some(err) = sink.error.take() {
        return sink.report(TransferOutcome::Failed(err));
    }
    match sink.verdict {
        Verdict::Write | Verdict::AlreadyComplete => sink.finish(),
        Verdict::Pending | Verdict::Abort => sink.report(TransferOutcome::Failed(
            TransferError::Internal("transfer ended without a response".to_string()),
        )),
    }
}
