use varberg::domain::{
    AnnotatedBlock, AnnotationDocument, AnnotationPage, Block, BlockType, ShapeType,
    ANNOTATION_VERSION,
};

fn sample_block(id: &str, page_index: u32, block_type: BlockType) -> Block {
    Block {
        id: id.to_string(),
        page_index,
        block_type,
        shape_type: ShapeType::Rectangle,
        coords_px: [12.0, 100.0, 480.0, 180.0],
        coords_norm: [0.019_607_843, 0.126_262_626, 0.784_313_725, 0.227_272_727],
        polygon_points: None,
        hint: Some("invoice header".to_string()),
        category: None,
        group_id: Some("g-1".to_string()),
    }
}

fn sample_document() -> AnnotationDocument {
    let blocks = vec![
        AnnotatedBlock {
            block: sample_block("AAAA-CCCC-DDD", 0, BlockType::Text),
            ocr_text: Some("Recognized paragraph".to_string()),
            ocr_status: "ok".to_string(),
            source: "remote_ocr".to_string(),
        },
        AnnotatedBlock {
            block: sample_block("EEEE-FFFF-GGG", 0, BlockType::Image),
            ocr_text: None,
            ocr_status: "failed".to_string(),
            source: "remote_ocr".to_string(),
        },
    ];
    AnnotationDocument::new(
        "contract.pdf",
        vec![AnnotationPage {
            page_number: 0,
            width: 612.0,
            height: 792.0,
            blocks,
        }],
    )
}

#[test]
fn given_version_2_document_when_serialized_and_reparsed_then_equal() {
    let document = sample_document();
    let json = document.to_json().unwrap();
    let reparsed = AnnotationDocument::from_json(&json).unwrap();

    assert_eq!(reparsed.version, ANNOTATION_VERSION);
    assert_eq!(reparsed.pages.len(), document.pages.len());
    assert_eq!(reparsed.block_count(), document.block_count());

    for (page, reparsed_page) in document.pages.iter().zip(&reparsed.pages) {
        for (block, reparsed_block) in page.blocks.iter().zip(&reparsed_page.blocks) {
            assert_eq!(block.block.id, reparsed_block.block.id);
            assert_eq!(block.ocr_text, reparsed_block.ocr_text);
            assert_eq!(block.ocr_status, reparsed_block.ocr_status);
            for (a, b) in block
                .block
                .coords_norm
                .iter()
                .zip(&reparsed_block.block.coords_norm)
            {
                assert!((a - b).abs() < 1e-9, "coords drifted: {a} vs {b}");
            }
        }
    }
}

#[test]
fn given_failed_block_then_marker_survives_round_trip() {
    let document = sample_document();
    let json = document.to_json().unwrap();
    let reparsed = AnnotationDocument::from_json(&json).unwrap();

    let failed = &reparsed.pages[0].blocks[1];
    assert_eq!(failed.ocr_status, "failed");
    assert!(failed.ocr_text.is_none());
}

#[test]
fn given_bare_block_list_then_it_parses_as_blocks_json() {
    let blocks = vec![
        sample_block("AAAA-CCCC-DDD", 0, BlockType::Text),
        sample_block("EEEE-FFFF-GGG", 1, BlockType::Table),
    ];
    let json = serde_json::to_string(&blocks).unwrap();
    let reparsed: Vec<Block> = serde_json::from_str(&json).unwrap();
    assert_eq!(reparsed, blocks);
}

#[test]
fn polygon_blocks_keep_their_vertices() {
    let mut block = sample_block("AAAA-CCCC-DDD", 0, BlockType::Text);
    block.shape_type = ShapeType::Polygon;
    block.polygon_points = Some(vec![[12.0, 100.0], [480.0, 100.0], [480.0, 180.0]]);

    let json = serde_json::to_string(&block).unwrap();
    let reparsed: Block = serde_json::from_str(&json).unwrap();
    assert_eq!(reparsed.polygon_points.as_ref().unwrap().len(), 3);
    assert_eq!(reparsed, block);
}
