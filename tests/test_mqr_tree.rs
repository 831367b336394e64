//! Integration tests for `MqrTree::insert` and `MqrTree::search`.


use mqr_tree::geometry::Envelope;
use mqr_tree::mqr_tree::MqrTree;
use shared::{pt, rect};

fn env(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Envelope {
    Envelope::new(min_x, max_x, min_y, max_y).unwrap()
}

#[test]
fn test_basic_region_fit() {
    let mut tree = MqrTree::new();
    tree.insert("A", pt(10.0, 10.0)).unwrap();
    tree.insert("B", pt(5.0, 5.0)).unwrap();
    tree.insert("C", pt(15.0, 15.0)).unwrap();
    tree.insert("D", env(10.0, 15.0, 10.0, 15.0)).unwrap();
    tree.insert("E", env(5.0, 10.0, 5.0, 10.0)).unwrap();

    let mut found: Vec<&str> = tree.search(&env(0.0, 20.0, 0.0, 20.0)).into_iter().copied().collect();
    found.sort_unstable();
    assert_eq!(found, vec!["A", "B", "C", "D", "E"]);
}

#[test]
fn test_region_search_returns_proper_subset() {
    let entries = [
        ("A", pt(10.0, 10.0)),
        ("B", pt(5.0, 5.0)),
        ("C", pt(15.0, 15.0)),
        ("D", env(10.0, 15.0, 10.0, 15.0)),
        ("E", env(5.0, 10.0, 5.0, 10.0)),
    ];

    let mut tree = MqrTree::new();
    for (name, mbr) in &entries {
        tree.insert(*name, *mbr).unwrap();
    }

    let query = env(6.0, 13.0, 6.0, 13.0);
    let mut expected: Vec<&str> = entries
        .iter()
        .filter(|(_, mbr)| mbr.intersects(&query))
        .map(|(name, _)| *name)
        .collect();
    expected.sort_unstable();

    let mut got: Vec<&str> = tree.search(&query).into_iter().copied().collect();
    got.sort_unstable();
    assert_eq!(got, expected);
}

/// After e1..e3 the root is NORMAL with NW/NE/SW filled; e4's arrival moves the root's
/// centroid onto e3's, promoting e3 to CENTER and the root to CENTER-typed; e5 lands
/// cleanly in SE; e6 collides with e5 there and forces a split. Exact slot contents
/// aren't observable through the public API, so this asserts the aggregate outcome:
/// every payload is present exactly once.
#[test]
fn test_six_envelope_insert_and_search() {
    let mut tree = MqrTree::new();
    tree.insert("e1", env(85.0, 200.0, 180.0, 360.0)).unwrap();
    tree.insert("e2", env(310.0, 510.0, 240.0, 330.0)).unwrap();
    tree.insert("e3", env(170.0, 340.0, 120.0, 240.0)).unwrap();
    tree.insert("e4", env(0.0, 115.0, 0.0, 90.0)).unwrap();
    tree.insert("e5", env(255.0, 405.0, 60.0, 150.0)).unwrap();
    tree.insert("e6", env(390.0, 470.0, 0.0, 90.0)).unwrap();

    assert_eq!(tree.len(), 6);
    let mut all: Vec<&str> = tree.search(&rect(-1000.0, -1000.0, 3000.0, 3000.0)).into_iter().copied().collect();
    all.sort_unstable();
    assert_eq!(all, vec!["e1", "e2", "e3", "e4", "e5", "e6"]);
}

/// Continuing from the six-envelope tree, e7's huge envelope forces the root's MBR (and
/// centroid) to shift again, reassigning several existing children. All seven payloads
/// must still be present and individually findable afterward.
#[test]
fn test_large_envelope_expansion_reassigns_children() {
    let mut tree = MqrTree::new();
    tree.insert("e1", env(85.0, 200.0, 180.0, 360.0)).unwrap();
    tree.insert("e2", env(310.0, 510.0, 240.0, 330.0)).unwrap();
    tree.insert("e3", env(170.0, 340.0, 120.0, 240.0)).unwrap();
    tree.insert("e4", env(0.0, 115.0, 0.0, 90.0)).unwrap();
    tree.insert("e5", env(255.0, 405.0, 60.0, 150.0)).unwrap();
    tree.insert("e6", env(390.0, 470.0, 0.0, 90.0)).unwrap();
    tree.insert("e7", env(-100.0, 600.0, -100.0, 600.0)).unwrap();

    assert_eq!(tree.len(), 7);
    let mut all: Vec<&str> = tree.search(&rect(-2000.0, -2000.0, 5000.0, 5000.0)).into_iter().copied().collect();
    all.sort_unstable();
    assert_eq!(all, vec!["e1", "e2", "e3", "e4", "e5", "e6", "e7"]);

    for name in ["e1", "e2", "e3", "e4", "e5", "e6", "e7"] {
        let nearest = tree.knn_search((250.0, 250.0), 7).unwrap();
        assert!(nearest.contains(&&name));
    }
}

#[test]
fn test_insert_rejects_inverted_envelope() {
    assert!(Envelope::new(10.0, 1.0, 0.0, 1.0).is_err());
}
