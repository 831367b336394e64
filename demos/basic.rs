use mqr_tree::geometry::Envelope;
use mqr_tree::mqr_tree::MqrTree;

fn main() {
    let mut tree: MqrTree<&str> = MqrTree::new();

    let entries = [
        ("A", Envelope::from_point(10.0, 10.0)),
        ("B", Envelope::from_point(5.0, 5.0)),
        ("C", Envelope::from_point(15.0, 15.0)),
        ("D", Envelope::new(10.0, 15.0, 10.0, 15.0).unwrap()),
        ("E", Envelope::new(5.0, 10.0, 5.0, 10.0).unwrap()),
    ];

    for (name, mbr) in entries {
        tree.insert(name, mbr).unwrap();
    }

    println!("tree holds {} payloads", tree.len());

    let whole_space = Envelope::new(0.0, 20.0, 0.0, 20.0).unwrap();
    println!("search(0,20,0,20) -> {:?}", tree.search(&whole_space));

    let subset = Envelope::new(6.0, 13.0, 6.0, 13.0).unwrap();
    println!("search(6,13,6,13) -> {:?}", tree.search(&subset));

    let nearest = tree.knn_search((9.0, 9.0), 2).unwrap();
    println!("knn_search((9,9), 2) -> {:?}", nearest);
}
