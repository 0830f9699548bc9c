use crate::types::{Detection, FINGER_CHAINS, TrackedHand};

pub const LINE_THICKNESS: i32 = 4;

const CHAIN_COLOR: [u8; 4] = [45, 212, 191, 255];
const POINT_COLOR: [u8; 4] = [251, 191, 36, 255];

/// Draws landmark points and the five wrist-to-tip finger chains for every
/// hand in `detection` onto a tightly packed RGBA canvas. Landmarks are
/// normalized against the canvas size; out-of-range points are clipped per
/// pixel, never rejected.
pub fn draw_detection(buffer: &mut [u8], width: u32, height: u32, detection: &Detection) {
    for hand in &detection.hands {
        draw_hand(buffer, width, height, hand);
    }
}

pub fn draw_hand(buffer: &mut [u8], width: u32, height: u32, hand: &TrackedHand) {
    let points: Vec<(f32, f32)> = hand
        .landmarks
        .iter()
        .map(|lm| (lm.x * width as f32, lm.y * height as f32))
        .collect();

    for chain in FINGER_CHAINS {
        for pair in chain.windows(2) {
            if let (Some(&a), Some(&b)) = (points.get(pair[0]), points.get(pair[1])) {
                draw_line(buffer, width, height, a, b, CHAIN_COLOR, LINE_THICKNESS);
            }
        }
    }

    let radius = (LINE_THICKNESS / 2).max(2) + 2;
    for &(x, y) in &points {
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        draw_circle(buffer, width, height, (x as i32, y as i32), radius, POINT_COLOR);
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    from: (f32, f32),
    to: (f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    if !from.0.is_finite() || !from.1.is_finite() || !to.0.is_finite() || !to.1.is_finite() {
        return;
    }

    let (mut x, mut y) = (from.0 as i32, from.1 as i32);
    let (end_x, end_y) = (to.0 as i32, to.1 as i32);
    let dx = (end_x - x).abs();
    let dy = -(end_y - y).abs();
    let step_x = if x < end_x { 1 } else { -1 };
    let step_y = if y < end_y { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        if radius > 0 {
            stamp(buffer, width, height, (x, y), radius, color);
        } else {
            put_pixel(buffer, width, height, x, y, color);
        }
        if x == end_x && y == end_y {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x += step_x;
        }
        if doubled <= dx {
            err += dx;
            y += step_y;
        }
    }
}

// Diamond-shaped brush, matches the line thickness.
fn stamp(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            if ox.abs() + oy.abs() <= radius {
                put_pixel(buffer, width, height, center.0 + ox, center.1 + oy, color);
            }
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            if ox * ox + oy * oy <= radius * radius {
                put_pixel(buffer, width, height, center.0 + ox, center.1 + oy, color);
            }
        }
    }
}

fn put_pixel(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x >= width || y >= height {
        return;
    }
    let idx = ((y * width + x) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}
