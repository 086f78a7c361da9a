//! Partner-facing collaborators and their in-memory stand-ins.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Cursor};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use cardrecon_core::{Partner, ResultCode};

use crate::invocation::PartnerCallError;
use crate::store::OutstandingRecord;

/// Real-time statement credit API of one partner.
///
/// Implementations must be safe to call twice for the same record, or
/// answer `DuplicateTransaction` the second time.
#[async_trait]
pub trait PartnerClient: Send + Sync {
    async fn request_statement_credit(
        &self,
        record: &OutstandingRecord,
    ) -> Result<ResultCode, PartnerCallError>;
}

/// A response file ready to be read.
pub struct ResponseFile {
    pub name: String,
    pub reader: Box<dyn BufRead + Send>,
}

/// Where partner response files come from (SFTP drop, bucket, ...).
///
/// A file stays pending until acknowledged, so a run that fails half way
/// sees it again.
pub trait PartnerFileSource: Send + Sync {
    /// Oldest pending response file of `partner`.
    fn next_response_file(&self, partner: Partner) -> io::Result<Option<ResponseFile>>;

    /// Mark a file processed.
    fn acknowledge(&self, partner: Partner, name: &str) -> io::Result<()>;
}

/// Where encoded settlement files go.
pub trait PartnerFileSink: Send + Sync {
    fn deliver(&self, partner: Partner, file_name: &str, contents: &str) -> io::Result<()>;
}

/// A file handed to [`InMemoryFileExchange`] as a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFile {
    pub partner: Partner,
    pub file_name: String,
    pub contents: String,
}

/// In-memory file drop for tests/dev: a response-file queue per partner and
/// a log of delivered files.
#[derive(Debug, Default)]
pub struct InMemoryFileExchange {
    inbound: Mutex<HashMap<Partner, VecDeque<(String, String)>>>,
    delivered: Mutex<Vec<DeliveredFile>>,
    reject_deliveries: AtomicBool,
}

impl InMemoryFileExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response_file(
        &self,
        partner: Partner,
        name: impl Into<String>,
        contents: impl Into<String>,
    ) {
        self.inbound
            .lock()
            .unwrap()
            .entry(partner)
            .or_default()
            .push_back((name.into(), contents.into()));
    }

    pub fn pending_response_files(&self, partner: Partner) -> usize {
        self.inbound
            .lock()
            .unwrap()
            .get(&partner)
            .map_or(0, VecDeque::len)
    }

    pub fn delivered(&self) -> Vec<DeliveredFile> {
        self.delivered.lock().unwrap().clone()
    }

    /// Fail every delivery until switched back.
    pub fn set_reject_deliveries(&self, reject: bool) {
        self.reject_deliveries.store(reject, Ordering::SeqCst);
    }
}

impl PartnerFileSource for InMemoryFileExchange {
    fn next_response_file(&self, partner: Partner) -> io::Result<Option<ResponseFile>> {
        let inbound = self.inbound.lock().unwrap();
        let Some((name, contents)) = inbound.get(&partner).and_then(VecDeque::front) else {
            return Ok(None);
        };
        Ok(Some(ResponseFile {
            name: name.clone(),
            reader: Box::new(Cursor::new(contents.clone().into_bytes())),
        }))
    }

    fn acknowledge(&self, partner: Partner, name: &str) -> io::Result<()> {
        let mut inbound = self.inbound.lock().unwrap();
        let queue = inbound.entry(partner).or_default();
        match queue.front() {
            Some((front, _)) if front == name => {
                queue.pop_front();
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{name} is not the pending {partner} response file"),
            )),
        }
    }
}

impl PartnerFileSink for InMemoryFileExchange {
    fn deliver(&self, partner: Partner, file_name: &str, contents: &str) -> io::Result<()> {
        if self.reject_deliveries.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "partner drop unavailable"));
        }
        self.delivered.lock().unwrap().push(DeliveredFile {
            partner,
            file_name: file_name.to_string(),
            contents: contents.to_string(),
        });
        Ok(())
    }
}

/// Partner client answering from a script, then with a fixed fallback.
#[derive(Debug)]
pub struct ScriptedPartnerClient {
    script: Mutex<VecDeque<Result<ResultCode, PartnerCallError>>>,
    fallback: ResultCode,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPartnerClient {
    pub fn new(fallback: ResultCode) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answer(self, answer: Result<ResultCode, PartnerCallError>) -> Self {
        self.script.lock().unwrap().push_back(answer);
        self
    }

    /// Partner transaction ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartnerClient for ScriptedPartnerClient {
    async fn request_statement_credit(
        &self,
        record: &OutstandingRecord,
    ) -> Result<ResultCode, PartnerCallError> {
        self.calls
            .lock()
            .unwrap()
            .push(record.partner_transaction_id.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }
}
