use canopy_core::{ClassVocabulary, Detection, TileId};
use canopy_raster::{
    tile_image, MarkerStyle, MosaicBuilder, MosaicCanvas, TileFormat, TileGrid, Tiler, TilerParams,
};
use image::{Rgb, RgbImage};

fn scene(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    })
}

#[test]
fn pasting_tiles_at_their_origins_restores_the_source() {
    let src = scene(96, 64);
    let grid = TileGrid::new(96, 64, 32).unwrap();
    let tiles = tile_image(&src, &grid);
    assert_eq!(tiles.len(), 6);

    let mut canvas = MosaicCanvas::with_extent(96, 64);
    for (i, tile) in tiles.iter().enumerate() {
        canvas
            .paste(&TileId::new(format!("t{i}")), tile.rect.x, tile.rect.y, &tile.image)
            .expect("fits");
    }
    assert_eq!(canvas.image(), &src);
}

#[test]
fn written_png_tiles_reassemble_exactly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src_path = dir.path().join("field.png");
    let src = scene(1280, 640);
    src.save(&src_path).expect("save");

    let tiler = Tiler::new(TilerParams {
        tile_size: 640,
        workers: 2,
        format: TileFormat::Png,
        ..TilerParams::default()
    })
    .expect("params");
    let tile_dir = dir.path().join("tiles");
    let report = tiler
        .run(&[src_path], &tile_dir, &tile_dir.join("manifest.csv"))
        .expect("tiling");
    assert!(report.failed.is_empty());

    let origins: Vec<(u32, u32)> = report
        .manifest
        .records()
        .iter()
        .map(|r| (r.origin_x, r.origin_y))
        .collect();
    assert_eq!(origins, vec![(0, 0), (640, 0)]);

    // Build without markers and compare below the caption area.
    let vocab = ClassVocabulary::new(["Oil Palm"]);
    let mosaic = MosaicBuilder::new(&vocab, MarkerStyle::default())
        .build(&report.manifest, "field", None)
        .expect("mosaic");
    assert_eq!(mosaic.image.dimensions(), (1280, 640));
    assert_eq!(mosaic.marker_count, 0);
    assert!(mosaic.skipped_tiles.is_empty());
    for y in 64..640 {
        for x in (0..1280).step_by(37) {
            assert_eq!(mosaic.image.get_pixel(x, y), src.get_pixel(x, y), "pixel {x},{y}");
        }
    }
}

#[test]
fn markers_are_counted_and_mosaic_saves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src_path = dir.path().join("plot.png");
    scene(200, 120).save(&src_path).expect("save");
    let tiler = Tiler::new(TilerParams {
        tile_size: 100,
        workers: 1,
        ..TilerParams::default()
    })
    .expect("params");
    let tile_dir = dir.path().join("tiles");
    let report = tiler
        .run(&[src_path], &tile_dir, &tile_dir.join("manifest.csv"))
        .expect("tiling");
    assert_eq!(report.manifest.len(), 4);

    let vocab = ClassVocabulary::new(["Oil Palm", "VOP"]);
    let dets = vec![Detection {
        tile: TileId::from("plot_tile_100_100"),
        class: "VOP".to_owned(),
        confidence: 0.8,
        x: 150.0,
        y: 110.0,
        width: 10.0,
        height: 10.0,
    }];
    let mosaic = MosaicBuilder::new(&vocab, MarkerStyle::default())
        .build(&report.manifest, "plot", Some(&dets))
        .expect("mosaic");
    assert_eq!(mosaic.image.dimensions(), (200, 120));
    assert_eq!(mosaic.marker_count, 1);
    assert_eq!(mosaic.image.get_pixel(150, 110), &Rgb([0, 0, 255]));

    let out = dir.path().join("mosaic.jpg");
    mosaic.save(&out, None, 90).expect("save");
    assert!(out.exists());
}
