// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::collections::BTreeMap;

use pst::config::InspectConfig;
use pst::{NodeFailure, NodeType, Pst};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Totals gathered while walking the node B-tree.
#[derive(Debug, Default)]
struct Summary {
    decoded: usize,
    by_type: BTreeMap<String, usize>,
    attachments: usize,
    recipients: usize,
    failures: Vec<NodeFailure>,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pst=info,pst_inspect=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match InspectConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Loaded configuration: file={}, verify_checksums={}, max_tree_depth={}",
        config.file.display(),
        config.reader.verify_checksums,
        config.reader.max_tree_depth
    );

    let pst = match Pst::open(&config.file, config.reader) {
        Ok(pst) => pst,
        Err(e) => {
            tracing::error!("Failed to open {}: {e}", config.file.display());
            std::process::exit(1);
        }
    };
    let header = pst.header();
    tracing::info!(
        "header: version {}, client version {}, encoding {}, file size {}",
        header.version,
        header.client_version,
        header.crypt_method,
        header.root.file_eof
    );

    let mut summary = Summary::default();
    for result in pst.scan_properties() {
        let (nid, _) = match result {
            Ok(decoded) => decoded,
            Err(failure) => {
                if failure.error.is_fatal() {
                    tracing::error!("Aborting scan: {failure}");
                    std::process::exit(1);
                }
                summary.failures.push(failure);
                continue;
            }
        };
        summary.decoded += 1;
        *summary
            .by_type
            .entry(format!("{:?}", nid.node_type()))
            .or_default() += 1;

        if nid.node_type() == NodeType::NormalMessage {
            match pst.attachments(nid) {
                Ok(attachments) => {
                    summary.attachments += attachments.items.len();
                    summary.failures.extend(attachments.failures);
                }
                Err(e) => summary.failures.push(NodeFailure::new(nid, e)),
            }
            match pst.recipients(nid) {
                Ok(recipients) => {
                    summary.recipients += recipients.len();
                    summary.failures.extend(recipients.failures);
                }
                Err(e) => summary.failures.push(NodeFailure::new(nid, e)),
            }
        }
    }

    for (node_type, count) in &summary.by_type {
        tracing::info!("{node_type}: {count}");
    }
    for failure in &summary.failures {
        tracing::warn!("{failure}");
    }
    tracing::info!(
        "{} nodes decoded, {} attachments, {} recipients, {} failures",
        summary.decoded,
        summary.attachments,
        summary.recipients,
        summary.failures.len()
    );
}
