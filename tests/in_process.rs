// tests/in_process.rs

use std::fs;
use std::path::{Path, PathBuf};

use runmanager::dag::{PrepareStep, SplitSpec};
use runmanager::exec::in_process::{
    merge_xml, prepare_work_dir, remove_materialized, split_file, split_output_paths,
    split_records,
};

#[test]
fn split_records_keeps_whole_lines_and_front_loads_remainder() {
    let chunks = split_records("a\nb\nc\nd\ne\n", 2);
    assert_eq!(chunks, vec!["a\nb\nc\n", "d\ne\n"]);

    let chunks = split_records("a\nb\nc", 3);
    assert_eq!(chunks, vec!["a\n", "b\n", "c"]);

    let chunks = split_records("only\n", 3);
    assert_eq!(chunks, vec!["only\n", "", ""]);

    // Zero parts is treated as one.
    assert_eq!(split_records("x\ny\n", 0), vec!["x\ny\n"]);
}

#[test]
fn split_output_names_are_stable() {
    let paths = split_output_paths(Path::new("/w"), Path::new("/in/data.csv"), 3, 2);
    assert_eq!(
        paths,
        vec![
            PathBuf::from("/w/data-3.csv"),
            PathBuf::from("/w/data-4.csv"),
            PathBuf::from("/w/data-5.csv"),
        ]
    );

    let bare = split_output_paths(Path::new("/w"), Path::new("cases"), 1, 0);
    assert_eq!(bare, vec![PathBuf::from("/w/cases-1")]);
}

#[test]
fn split_file_writes_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cases.txt");
    fs::write(&input, "1\n2\n3\n4\n").unwrap();

    let spec = SplitSpec {
        outputs: split_output_paths(&dir.path().join("out"), &input, 2, 0),
        input,
    };
    let written = split_file(&spec).unwrap();

    assert_eq!(written, spec.outputs);
    assert_eq!(fs::read_to_string(&written[0]).unwrap(), "1\n2\n");
    assert_eq!(fs::read_to_string(&written[1]).unwrap(), "3\n4\n");
}

#[test]
fn split_file_missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = SplitSpec {
        input: dir.path().join("missing.txt"),
        outputs: vec![dir.path().join("missing-1.txt")],
    };
    assert!(split_file(&spec).is_err());
}

#[test]
fn merge_xml_expands_nested_includes() {
    let dir = tempfile::tempdir().unwrap();
    let include_dir = dir.path().join("include");
    fs::create_dir_all(&include_dir).unwrap();

    fs::write(
        dir.path().join("main.xml"),
        "<root>\n<include href=\"local.xml\"/>\n<include href = \"shared.xml\" />\n</root>\n",
    )
    .unwrap();
    fs::write(dir.path().join("local.xml"), "<local/>").unwrap();
    fs::write(include_dir.join("shared.xml"), "<shared><include href=\"leaf.xml\"/></shared>").unwrap();
    fs::write(include_dir.join("leaf.xml"), "<leaf/>").unwrap();

    let merged = merge_xml(&dir.path().join("main.xml"), Some(&include_dir)).unwrap();
    assert_eq!(merged, "<root>\n<local/>\n<shared><leaf/></shared>\n</root>\n");
}

#[test]
fn merge_xml_reports_missing_includes_and_loops() {
    let dir = tempfile::tempdir().unwrap();

    fs::write(dir.path().join("broken.xml"), "<include href=\"nowhere.xml\"/>").unwrap();
    let err = merge_xml(&dir.path().join("broken.xml"), None).unwrap_err();
    assert!(err.to_string().contains("nowhere.xml"));

    fs::write(dir.path().join("a.xml"), "<include href=\"b.xml\"/>").unwrap();
    fs::write(dir.path().join("b.xml"), "<include href=\"a.xml\"/>").unwrap();
    let err = merge_xml(&dir.path().join("a.xml"), None).unwrap_err();
    assert!(err.to_string().contains("include loop"));
}

#[test]
fn prepare_work_dir_materializes_and_cleanup_removes() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("weather")).unwrap();
    fs::write(src.join("model.idf"), "Version,8.5;").unwrap();
    fs::write(src.join("weather").join("chicago.epw"), "LOCATION").unwrap();
    fs::write(src.join("in.xml"), "<a><include href=\"b.xml\"/></a>").unwrap();
    fs::write(src.join("b.xml"), "<b/>").unwrap();

    let work = dir.path().join("work");
    let steps = vec![
        PrepareStep::Copy {
            from: src.join("model.idf"),
            to: PathBuf::from("model.idf"),
        },
        PrepareStep::Copy {
            from: src.join("weather"),
            to: PathBuf::from("weather"),
        },
        PrepareStep::MergeXml {
            source: src.join("in.xml"),
            include_dir: None,
            to: PathBuf::from("merged.xml"),
        },
    ];

    let created = prepare_work_dir(&work, &steps).unwrap();
    assert_eq!(created.len(), 3);
    assert_eq!(fs::read_to_string(work.join("model.idf")).unwrap(), "Version,8.5;");
    assert_eq!(
        fs::read_to_string(work.join("weather").join("chicago.epw")).unwrap(),
        "LOCATION"
    );
    assert_eq!(fs::read_to_string(work.join("merged.xml")).unwrap(), "<a><b/></a>");

    let failures = remove_materialized(&created);
    assert!(failures.is_empty());
    assert!(!work.join("model.idf").exists());
    assert!(!work.join("weather").exists());
    assert!(work.is_dir());

    // Removing twice reports the missing paths.
    assert_eq!(remove_materialized(&created).len(), 3);
}
