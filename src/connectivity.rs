//! Reachability of the REST server.
//!
//! The engine never decides on its own whether it is online; it asks a
//! [`ConnectivityMonitor`]. Hosts that already know (an OS network callback, a
//! test) drive a [`ManualConnectivity`]. The command-line tool uses [`HttpProbe`],
//! which polls the server.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Snapshot published to subscribers.
///
/// A watch channel only keeps the latest value, so a brief drop that is
/// already over by the time a subscriber looks would be invisible from
/// `online` alone. `reconnects` counts every offline → online transition and
/// never goes down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
  pub online: bool,
  pub reconnects: u64,
}

pub trait ConnectivityMonitor: Send + Sync {
  /// Whether the server is believed reachable right now.
  fn is_online(&self) -> bool;

  /// Feed of link changes. The current value is the latest state.
  fn subscribe(&self) -> watch::Receiver<LinkState>;
}

/// Connectivity state pushed in from outside.
#[derive(Debug)]
pub struct ManualConnectivity {
  tx: watch::Sender<LinkState>,
}

impl ManualConnectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(LinkState {
      online,
      reconnects: 0,
    });
    Self { tx }
  }

  /// Record the current state. Returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|link| {
      if link.online == online {
        return false;
      }
      if online {
        link.reconnects += 1;
      }
      link.online = online;
      true
    });
    if changed {
      info!(online, "connectivity changed");
    }
    changed
  }
}

impl ConnectivityMonitor for ManualConnectivity {
  fn is_online(&self) -> bool {
    self.tx.borrow().online
  }

  fn subscribe(&self) -> watch::Receiver<LinkState> {
    self.tx.subscribe()
  }
}

/// Polls a health endpoint and publishes reachability.
///
/// Any HTTP response counts as reachable, including error statuses: the
/// question is whether the transport works, not whether the server is happy.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
  interval: Duration,
  state: ManualConnectivity,
}

impl HttpProbe {
  pub fn new(url: Url, interval: Duration, timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      url,
      interval,
      // Pessimistic until the first probe answers
      state: ManualConnectivity::new(false),
    })
  }

  /// Probe once and publish the result.
  pub async fn check(&self) -> bool {
    let reachable = match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        debug!(status = %response.status(), "probe answered");
        true
      }
      Err(e) => {
        debug!(error = %e, "probe failed");
        false
      }
    };
    self.state.set_online(reachable);
    reachable
  }

  /// Probe on a fixed interval until the task is aborted.
  pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
    let probe = Arc::clone(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(probe.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        probe.check().await;
      }
    })
  }
}

impl ConnectivityMonitor for HttpProbe {
  fn is_online(&self) -> bool {
    self.state.is_online()
  }

  fn subscribe(&self) -> watch::Receiver<LinkState> {
    self.state.subscribe()
  }
}
