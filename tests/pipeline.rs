mod common;

use std::{collections::BTreeSet, sync::Arc};

use common::*;
use ir_reduce::{
    calibrate::defect_mask, group::GroupError, read_and_group, reduce_and_refine, refine_only,
    AstromaticConfig, Band, CandidatePaths, DummyPool, Error, ReduceOptions, Refiner, ThreadPool,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Fixture {
    dir: tempfile::TempDir,
    io: Arc<MemoryIo>,
    paths: CandidatePaths,
    bad: Vec<(usize, usize)>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let io = Arc::new(MemoryIo::default());
    let bad = vec![(3, 4), (12, 12), (20, 7)];
    let bads = vec![
        io.insert(dir.path(), "bad_a.fits", bad_pixel_map(&bad[..2])),
        io.insert(dir.path(), "bad_b.fits", bad_pixel_map(&bad[2..])),
    ];
    let flats = vec![
        io.insert(dir.path(), "flat_j.fits", flat("J")),
        io.insert(dir.path(), "flat_ks.fits", flat("Ks")),
    ];
    let science = vec![
        io.insert(dir.path(), "sci_1.fits", science("J", 1000.)),
        io.insert(dir.path(), "sci_2.fits", science("J", 1040.)),
        io.insert(dir.path(), "sci_3.fits", science("J", 980.)),
    ];
    Fixture {
        dir,
        io,
        paths: CandidatePaths::new(bads, flats, science),
        bad,
    }
}

#[test]
fn reduce_and_refine_end_to_end() {
    init();
    let fixture = fixture();
    let config_dir = config_dir();
    let runner = Arc::new(StubRunner::default());
    let refiner = Refiner::new(
        AstromaticConfig::in_dir(config_dir.path()),
        runner.clone(),
        fixture.io.clone(),
    );
    let refined = reduce_and_refine(
        &fixture.paths,
        &ReduceOptions::default(),
        &refiner,
        &ThreadPool::with_threads(2).unwrap(),
    )
    .unwrap();

    assert_eq!(refined.header, SCAMP_HEAD);
    assert_eq!(refined.catalog, b"LDAC catalog");
    assert_eq!(refined.reference_catalog, b"reference catalog");

    let bad_maps: Vec<_> = fixture.paths.bad.iter().map(|p| fixture.io.get(p).unwrap()).collect();
    let expected = union(&bad_maps.iter().map(defect_mask).collect::<Vec<_>>());
    assert_eq!(expected.count_invalid(), fixture.bad.len());
    assert_eq!(refined.image.mask(), Some(&expected));

    let image = &refined.image;
    assert_eq!(image.shape(), SHAPE);
    assert!(image.data.values().iter().all(|v| v.is_finite()));
    assert_eq!(image.header.get_f64("NCOMBINE"), Some(3.));
    assert_eq!(image.header.get_str("BUNIT"), Some("electron"));
    assert!(image.header.keys().all(|k| !k.starts_with("PV")));
    let wcs = image.wcs.as_ref().unwrap();
    assert_eq!(wcs.crval[0], 321.45102359);

    assert_eq!(runner.calls.lock().unwrap().len(), 2);
}

#[test]
fn pools_give_the_same_frame() {
    let fixture = fixture();
    let options = ReduceOptions::default().band(Band::J);
    let serial =
        ir_reduce::reduce_image(&fixture.paths, &options, fixture.io.as_ref(), &DummyPool).unwrap();
    let parallel = ir_reduce::reduce_image(
        &fixture.paths,
        &options,
        fixture.io.as_ref(),
        &ThreadPool::with_threads(3).unwrap(),
    )
    .unwrap();
    assert_eq!(serial.data, parallel.data);
    assert_eq!(serial.mask(), parallel.mask());
}

#[test]
fn grouping_is_idempotent() {
    let fixture = fixture();
    let names = |band: Band| {
        let mut grouping = read_and_group(&fixture.paths, fixture.io.as_ref(), &DummyPool).unwrap();
        let group = grouping.take(band).unwrap();
        let set = |images: &[ir_reduce::Image]| {
            images
                .iter()
                .map(|i| i.origin().to_string())
                .collect::<BTreeSet<_>>()
        };
        (set(&group.bad), set(&group.flat), set(&group.science))
    };
    assert_eq!(names(Band::J), names(Band::J));
    let (bad, flat, science) = names(Band::J);
    assert_eq!((bad.len(), flat.len(), science.len()), (2, 1, 3));
}

#[test]
fn band_without_science_frames_is_rejected() {
    let fixture = fixture();
    let err = ir_reduce::reduce_image(
        &fixture.paths,
        &ReduceOptions::default().band(Band::Ks),
        fixture.io.as_ref(),
        &DummyPool,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Group(GroupError::InsufficientData { band: Band::Ks, .. })
    ));
}

#[test]
fn missing_path_fails_before_reading() {
    let mut fixture = fixture();
    fixture.paths.science.push(fixture.dir.path().join("lost.fits"));
    let err = ir_reduce::reduce_image(
        &fixture.paths,
        &ReduceOptions::default(),
        fixture.io.as_ref(),
        &DummyPool,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Group(GroupError::MissingFile(_))));
}

#[test]
fn refine_only_writes_every_output() {
    let fixture = fixture();
    let config_dir = config_dir();
    let refiner = Refiner::new(
        AstromaticConfig::in_dir(config_dir.path()),
        Arc::new(StubRunner::default()),
        fixture.io.clone(),
    );
    let inputs = &fixture.paths.science[..2];
    let outputs = [
        fixture.dir.path().join("one.fits"),
        fixture.dir.path().join("two.fits"),
    ];
    refine_only(inputs, &outputs, &refiner).unwrap();
    for output in &outputs {
        assert!(fixture.io.get(output).unwrap().wcs.is_some());
        let head = output.with_file_name(format!(
            "{}_scamp.head",
            output.file_stem().unwrap().to_string_lossy()
        ));
        assert_eq!(std::fs::read_to_string(head).unwrap(), SCAMP_HEAD);
    }
    assert!(matches!(
        refine_only(inputs, &outputs[..1], &refiner),
        Err(Error::Mismatch {
            inputs: 2,
            outputs: 1
        })
    ));
}
