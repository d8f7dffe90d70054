mod common;

use std::sync::Arc;
use std::time::Duration;

use common::synthetic::{flat_room, rect_mask, scratch_path, solid_texture, two_tone};
use roomvis::canvas::{mask_area, SelectionMode};
use roomvis::ops::ai::PrecomputedSegmenter;
use roomvis::{EngineSettings, Selection, SelectorState, Session, SessionError, TextureRef, Tool, ToolOutcome};

const GRAY: [u8; 4] = [90, 110, 130, 255];

/// 800x600 room with two surfaces: a wall rectangle and a floor strip.
fn room_session() -> Session {
    let image = flat_room(800, 600, GRAY);
    let seg = PrecomputedSegmenter::new(vec![
        rect_mask(800, 600, 100, 50, 500, 300),
        rect_mask(800, 600, 0, 450, 799, 599),
    ]);
    let mut session = Session::new(image, "room.jpg", Arc::new(seg));
    assert_eq!(session.analyze().unwrap(), 2);
    session
}

fn red() -> TextureRef {
    TextureRef::new("red", solid_texture(16, [255, 0, 0, 255]))
}

fn blue() -> TextureRef {
    TextureRef::new("blue", solid_texture(16, [0, 0, 255, 255]))
}

#[test]
fn red_wall_is_painted_and_far_pixels_are_untouched() {
    let mut session = room_session();
    session.select_mask(0).unwrap();
    assert_eq!(session.state(), SelectorState::SingleSelected);

    let out = session.composite(&red(), 1.0).unwrap();
    assert_eq!(out.dimensions(), (800, 600));
    assert_eq!(out.get_pixel(300, 175).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(700, 500).0, GRAY);
    assert_eq!(out.get_pixel(20, 20).0, GRAY);
    // The source image is never mutated
    assert_eq!(session.image().get_pixel(300, 175).0, GRAY);
}

#[test]
fn multi_select_composites_the_union() {
    let mut session = room_session();
    session.toggle_mask(0).unwrap();
    session.toggle_mask(1).unwrap();
    assert_eq!(session.state(), SelectorState::MultiSelected);
    let out = session.composite(&red(), 1.0).unwrap();
    assert_eq!(out.get_pixel(300, 175).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(400, 520).0, [255, 0, 0, 255]);
}

#[test]
fn brush_then_eraser_restores_the_raster() {
    let mut session = room_session();
    session.set_tool(Tool::Brush).unwrap();
    let before = session.custom_mask().unwrap().clone();

    let stroke = vec![(200.0, 200.0), (260.0, 220.0), (300.0, 260.0)];
    let drawn = session.apply_stroke(stroke.clone(), 15.0, SelectionMode::Add).unwrap();
    assert!(matches!(drawn, ToolOutcome::Changed(Some(_))));
    assert!(mask_area(session.custom_mask().unwrap()) > 0);

    session.apply_stroke(stroke, 15.0, SelectionMode::Subtract).unwrap();
    assert_eq!(session.custom_mask().unwrap().as_raw(), before.as_raw());
    assert_eq!(session.tool(), Tool::Eraser);
}

#[test]
fn brush_radius_outside_limits_is_rejected() {
    let mut session = room_session();
    let err = session.apply_stroke(vec![(10.0, 10.0)], 80.0, SelectionMode::Add).unwrap_err();
    assert!(matches!(err, SessionError::InvalidRequest(_)));
    // Validation failed before anything switched to CustomDrawn
    assert_eq!(session.state(), SelectorState::MasksLoaded);
}

#[test]
fn lasso_replaces_the_catalog_selection() {
    let mut session = room_session();
    session.select_mask(0).unwrap();
    session.select_mask(1).unwrap();

    let outcome = session.apply_lasso(vec![(600.0, 50.0), (700.0, 50.0), (700.0, 150.0), (600.0, 150.0)]).unwrap();
    assert_eq!(outcome, ToolOutcome::Changed(None));
    assert_eq!(session.state(), SelectorState::CustomDrawn);
    assert!(session.selected().is_empty());
    assert_eq!(session.selection(), Selection::Custom);

    let raster = session.custom_mask().unwrap();
    assert_eq!(raster.get_pixel(650, 100).0[0], 255);
    assert_eq!(raster.get_pixel(300, 175).0[0], 0);
    assert!(session.can_composite());

    // Only the lasso region is painted; A and B are no longer part of it
    let out = session.composite(&red(), 1.0).unwrap();
    assert_eq!(out.get_pixel(650, 100).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(300, 175).0, GRAY);
    assert_eq!(out.get_pixel(400, 520).0, GRAY);
}

#[test]
fn short_lasso_and_far_wand_are_no_ops() {
    let mut session = room_session();
    session.set_tool(Tool::Lasso).unwrap();
    let before = session.custom_mask().unwrap().clone();

    assert_eq!(session.apply_lasso(vec![(10.0, 10.0), (50.0, 50.0)]).unwrap(), ToolOutcome::NoOp);
    assert_eq!(session.apply_magic_wand((10_000.0, 10_000.0), 30.0).unwrap(), ToolOutcome::NoOp);
    assert_eq!(session.custom_mask().unwrap().as_raw(), before.as_raw());
}

#[test]
fn zero_tolerance_wand_selects_the_seed_band() {
    let image = two_tone(200, 100, 120, [200, 180, 160, 255], [40, 40, 40, 255]);
    let seg = PrecomputedSegmenter::new(vec![rect_mask(200, 100, 0, 0, 10, 10)]);
    let mut session = Session::new(image, "bands.png", Arc::new(seg));
    session.analyze().unwrap();

    session.apply_magic_wand((30.0, 40.0), 0.0).unwrap();
    let raster = session.custom_mask().unwrap();
    assert_eq!(mask_area(raster), 120 * 100);
    assert_eq!(raster.get_pixel(119, 50).0[0], 255);
    assert_eq!(raster.get_pixel(120, 50).0[0], 0);
}

#[test]
fn display_coordinates_are_mapped_to_image_pixels() {
    let mut session = room_session();
    // Shown at half size
    session.set_display_size(400.0, 300.0);
    session.apply_lasso(vec![(300.0, 25.0), (350.0, 25.0), (350.0, 75.0), (300.0, 75.0)]).unwrap();
    let raster = session.custom_mask().unwrap();
    assert_eq!(raster.get_pixel(650, 100).0[0], 255);
    assert_eq!(raster.get_pixel(325, 50).0[0], 0);
}

#[test]
fn reset_twice_matches_reset_once() {
    let mut session = room_session();
    session.select_mask(0).unwrap();
    session.composite(&red(), 0.9).unwrap();

    session.reset();
    let once = (session.state(), session.selection(), session.tool(), session.result().is_some());
    session.reset();
    let twice = (session.state(), session.selection(), session.tool(), session.result().is_some());
    assert_eq!(once, twice);
    assert_eq!(once.0, SelectorState::MasksLoaded);
    assert_eq!(session.masks().len(), 2);
    assert!(Arc::ptr_eq(&session.displayed_image(), session.image()));
}

#[test]
fn newer_visualize_supersedes_older() {
    let mut session = room_session();
    session.select_mask(0).unwrap();

    let first = session.visualize(&red(), 1.0).unwrap();
    let second = session.visualize(&blue(), 1.0).unwrap();
    assert!(second > first);
    assert!(session.is_visualizing());

    let done = session.wait_visualize(Duration::from_secs(30)).expect("visualize timed out").unwrap();
    assert_eq!(done.get_pixel(300, 175).0, [0, 0, 255, 255]);
    assert!(!session.is_visualizing());

    // A late message from the first request is dropped
    std::thread::sleep(Duration::from_millis(50));
    assert!(session.poll_visualize().is_none());
    assert_eq!(session.displayed_image().get_pixel(300, 175).0, [0, 0, 255, 255]);
}

#[test]
fn reset_cancels_a_pending_visualize() {
    let mut session = room_session();
    session.select_mask(0).unwrap();
    session.visualize(&red(), 1.0).unwrap();
    session.reset();
    assert!(!session.is_visualizing());
    assert!(session.wait_visualize(Duration::from_millis(200)).is_none());
    std::thread::sleep(Duration::from_millis(50));
    assert!(session.poll_visualize().is_none());
    assert!(session.result().is_none());
}

#[test]
fn settings_without_perspective_still_fill_the_region() {
    let image = flat_room(200, 150, GRAY);
    let seg = PrecomputedSegmenter::new(vec![rect_mask(200, 150, 40, 30, 160, 120)]);
    let settings = EngineSettings { perspective: false, feather_radius: 2, ..EngineSettings::default() };
    let mut session = Session::with_settings(image, "small.png", Arc::new(seg), settings);
    session.analyze().unwrap();
    session.select_mask(0).unwrap();
    let out = session.composite(&red(), 1.0).unwrap();
    assert_eq!(out.get_pixel(100, 75).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(5, 5).0, GRAY);
}

#[test]
fn snapshot_file_restores_selection() {
    let path = scratch_path("session.rvs");
    let mut session = room_session();
    session.select_mask(1).unwrap();
    session.save_snapshot(&path).unwrap();

    session.reset();
    assert!(session.selected().is_empty());
    session.load_snapshot(&path).unwrap();
    assert_eq!(session.selection(), Selection::Catalog(vec![1]));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn edits_after_visualize_do_not_reach_the_pending_result() {
    let mut session = room_session();
    session.apply_lasso(vec![(600.0, 50.0), (700.0, 50.0), (700.0, 150.0), (600.0, 150.0)]).unwrap();
    session.visualize(&red(), 1.0).unwrap();

    // Erase the centre while the composite may still be running
    session.apply_stroke(vec![(650.0, 100.0)], 20.0, SelectionMode::Subtract).unwrap();
    assert_eq!(session.custom_mask().unwrap().get_pixel(650, 100).0[0], 0);

    let done = session.wait_visualize(Duration::from_secs(30)).expect("visualize timed out").unwrap();
    assert_eq!(done.get_pixel(650, 100).0, [255, 0, 0, 255]);
}

#[test]
fn settings_change_drops_the_pending_visualize() {
    let mut session = room_session();
    session.select_mask(0).unwrap();
    session.visualize(&red(), 1.0).unwrap();

    let narrow = EngineSettings { feather_radius: 1, ..EngineSettings::default() };
    session.set_settings(narrow);
    assert!(!session.is_visualizing());
    assert!(session.wait_visualize(Duration::from_millis(200)).is_none());
    std::thread::sleep(Duration::from_millis(50));
    assert!(session.poll_visualize().is_none());
    assert_eq!(session.cached_results(), 0);

    // 20 px outside the wall: untouched with a 1 px feather
    let out = session.composite(&red(), 1.0).unwrap();
    assert_eq!(out.get_pixel(520, 175).0, GRAY);
    assert_eq!(out.get_pixel(300, 175).0, [255, 0, 0, 255]);
}
