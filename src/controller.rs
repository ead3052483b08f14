use crate::browser::{BridgeReply, BrowserResolver};
use crate::ip_geo::{IpResolver, ResolveError};
use crate::record::LocationRecord;
use crate::session::Session;
use crate::store::{LocationStore, RecordId};

use std::net::IpAddr;
use thiserror::Error;

pub const PERMISSION_INSTRUCTIONS: &str = "\
Location sharing is blocked for this site. To share your location:
1. Click the lock or \"i\" icon in the address bar
2. Find the \"Location\" permission
3. Change it to \"Allow\"
4. Reload the page and try again";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("location storage is unavailable")]
    StoreUnavailable,
    #[error("location could not be saved")]
    WriteRejected,
}

/// Terminal state of one resolution attempt. `Idle` means nothing was attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Idle,
    Stored {
        id: RecordId,
        record: LocationRecord,
    },
    Failed(Failure),
}

impl Outcome {
    /// Text shown to the visitor
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Idle => None,
            Self::Stored { record, .. } => Some(format!("Location recorded: {record}")),
            Self::Failed(Failure::Resolve(ResolveError::PermissionDenied)) => {
                Some(PERMISSION_INSTRUCTIONS.to_owned())
            }
            Self::Failed(Failure::Resolve(_)) => {
                Some("Your location could not be determined.".to_owned())
            }
            Self::Failed(failure) => Some(format!("Sorry, {failure}.")),
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLoad {
    pub ip: Outcome,
    /// Ask the browser again without a click, permission was already granted in this session
    pub auto_browser: bool,
}

/// Drives resolution and storage for page loads and the share button
pub struct PageController {
    ip_resolver: IpResolver,
    browser_resolver: BrowserResolver,
    store: Option<LocationStore>,
}

impl PageController {
    pub fn new(ip_resolver: IpResolver, store: Option<LocationStore>) -> Self {
        Self {
            ip_resolver,
            browser_resolver: BrowserResolver,
            store,
        }
    }

    pub fn store(&self) -> Option<&LocationStore> {
        self.store.as_ref()
    }

    /// `client_ip` is the best public address found for the request, if any
    pub async fn on_page_load(&self, session: &Session, client_ip: Option<IpAddr>) -> PageLoad {
        let consent = session.consent();
        let ip = if consent.ip {
            match self.ip_resolver.resolve(client_ip).await {
                Ok(record) => self.store_record(record).await,
                Err(err) => Outcome::Failed(err.into()),
            }
        } else {
            Outcome::Idle
        };
        PageLoad {
            ip,
            auto_browser: consent.browser && session.browser_granted(),
        }
    }

    pub async fn on_browser_report(
        &self,
        session: &mut Session,
        reply: Result<Option<BridgeReply>, ResolveError>,
    ) -> Outcome {
        if !session.consent().browser {
            return Outcome::Idle;
        }
        match reply.and_then(|reply| self.browser_resolver.resolve(reply)) {
            Ok(record) => {
                session.mark_browser_granted();
                self.store_record(record).await
            }
            Err(err) => Outcome::Failed(err.into()),
        }
    }

    async fn store_record(&self, record: LocationRecord) -> Outcome {
        let Some(store) = self.store.as_ref() else {
            log::warn!("dropping {:?} location, no database connection", record.method());
            return Outcome::Failed(Failure::StoreUnavailable);
        };
        match store.insert(&record).await {
            Some(id) => Outcome::Stored { id, record },
            None => Outcome::Failed(Failure::WriteRejected),
        }
    }
}
