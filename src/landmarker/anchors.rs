use std::sync::OnceLock;

pub const NUM_ANCHORS: usize = 2016;

/// SSD anchor centers for the 192-input palm model, in normalized
/// coordinates. Stride 8 contributes a 24x24 map with 2 anchors per cell;
/// the three stride-16 layers share one 12x12 map and stack to 6 per cell.
/// The decode step only needs the centers, so width and height are omitted.
pub fn anchors() -> &'static [[f32; 2]] {
    static ANCHORS: OnceLock<Vec<[f32; 2]>> = OnceLock::new();
    ANCHORS.get_or_init(|| {
        let mut anchors = Vec::with_capacity(NUM_ANCHORS);
        push_layer(&mut anchors, 24, 2);
        push_layer(&mut anchors, 12, 6);
        anchors
    })
}

fn push_layer(anchors: &mut Vec<[f32; 2]>, grid: u32, per_cell: usize) {
    for row in 0..grid {
        for col in 0..grid {
            let cx = (col as f32 + 0.5) / grid as f32;
            let cy = (row as f32 + 0.5) / grid as f32;
            for _ in 0..per_cell {
                anchors.push([cx, cy]);
            }
        }
    }
}
