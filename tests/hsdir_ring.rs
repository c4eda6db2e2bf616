//! Directory ring responsibility against the reference router status
//! fixture: ring start, wrap-around and mid-ring queries.

use std::sync::Arc;

use onionmux::descriptor::router_status::parse_router_status_entries;
use onionmux::tor::mock::MockController;
use onionmux::tor::{DirectoryRing, HsDirTracker, N_CONSECUTIVE_REPLICAS};

const ROUTER_STATUS: &str = include_str!("../testdata/router_status_short.txt");

async fn fixture_tracker() -> Arc<HsDirTracker<MockController>> {
    let entries = parse_router_status_entries(ROUTER_STATUS).expect("fixture parses");

    let controller = Arc::new(MockController::new());
    controller.set_router_status(entries);

    let tracker = Arc::new(HsDirTracker::new(controller));
    tracker.refresh().await.expect("refresh succeeds");
    tracker
}

fn nicknames(entries: &[onionmux::descriptor::router_status::RouterStatusEntry]) -> Vec<String> {
    entries.iter().map(|e| e.nickname.clone()).collect()
}

#[tokio::test]
async fn fixture_filters_to_hsdir_entries() {
    let tracker = fixture_tracker().await;
    // UbuntuCore239 carries no HSDir flag and is excluded
    assert_eq!(tracker.len(), 8);
}

#[tokio::test]
async fn query_before_ring_start_takes_first_entries() {
    let tracker = fixture_tracker().await;

    let got = tracker
        .responsible("AAFBBVBQCHVESKFDL5QQIBPZFNCDHNG3")
        .unwrap();

    assert_eq!(got.len(), N_CONSECUTIVE_REPLICAS);
    assert_eq!(
        nicknames(&got),
        ["seele", "PutoElQueLee293884", "CalyxInstitute14"]
    );
    assert_eq!(
        got[0].fingerprint,
        "000A10D43011EA4928A35F610405F92B4433B4DC"
    );
}

#[tokio::test]
async fn query_beyond_ring_end_wraps_to_start() {
    let tracker = fixture_tracker().await;

    let got = tracker
        .responsible("A4FSOU4XTVI7MZKLGNU4P7VOBZQJHL46")
        .unwrap();

    assert_eq!(
        nicknames(&got),
        ["seele", "PutoElQueLee293884", "CalyxInstitute14"]
    );
}

#[tokio::test]
async fn mid_ring_query_takes_consecutive_entries() {
    let tracker = fixture_tracker().await;

    let got = tracker
        .responsible("AHF3RQU224ATC5XYHH35JTWXFLIUFB7H")
        .unwrap();

    assert_eq!(nicknames(&got), ["mravenisko1", "aerona", "bauruine56"]);
    assert_eq!(
        got[0].fingerprint,
        "01D3B71F140FFEC3A0C1FE84A656AE7697971EA4"
    );
    assert_eq!(
        got[1].fingerprint,
        "01E79D11DAF1B2F522CED15F3304C37656F98C7E"
    );
    assert_eq!(
        got[2].fingerprint,
        "021047C51A57254D263DDB8B9277CA1C286D600E"
    );
}

#[tokio::test]
async fn responsible_entries_are_consecutive_in_ring_order() {
    let tracker = fixture_tracker().await;

    // any query returns N consecutive ring members
    let got = tracker
        .responsible("J3ZUU5O2DY5OLOD2HY74OJP3SHG24LZP")
        .unwrap();
    assert_eq!(got.len(), N_CONSECUTIVE_REPLICAS);

    let mut fingerprints: Vec<String> = got.iter().map(|e| e.fingerprint.clone()).collect();
    let mut sorted = fingerprints.clone();
    sorted.sort();
    // no wrap inside this window, so ring order is fingerprint order
    assert_eq!(fingerprints, sorted);
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), N_CONSECUTIVE_REPLICAS);
}

#[tokio::test]
async fn rejects_malformed_descriptor_id() {
    let tracker = fixture_tracker().await;
    assert!(tracker.responsible("rrrrrrrrrrrrrrrrrr").is_err());
}
