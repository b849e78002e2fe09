use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use rayon::prelude::*;

use crate::{
    atlas::KernelAtlas,
    core::{ColorPlane, DepthPlane, Resolution, dioptres_from_meters},
    interpolate::LayerLayout,
};

/// Per-pixel record staged during the build stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fragment {
    pub color: [f32; 4],
    pub depth_m: f32,
    pub blur_radius_px: f32,
    pub layer: u32,
    pub x: u32,
    pub y: u32,
}

/// Within-tile ordering record: `(fragment index, depth)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileSortEntry {
    pub fragment_index: u32,
    pub depth_m: f32,
}

fn pack_entry(entry: TileSortEntry) -> u64 {
    (u64::from(entry.depth_m.to_bits()) << 32) | u64::from(entry.fragment_index)
}

fn unpack_entry(packed: u64) -> TileSortEntry {
    TileSortEntry {
        fragment_index: (packed & 0xFFFF_FFFF) as u32,
        depth_m: f32::from_bits((packed >> 32) as u32),
    }
}

/// Tile-local fragment registry.
///
/// Registration runs concurrently across pixels, so each tile carries an
/// atomic counter and claims sort-entry slots lock-free; an entry packs into
/// one `u64` word. Once a tile saturates at `capacity`
/// (`TILE_MAX_FRAGMENTS`), further fragments for that tile are dropped and
/// counted, degrading accuracy instead of failing the frame.
#[derive(Debug)]
pub struct TileGrid {
    tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
    capacity: u32,
    counters: Vec<AtomicU32>,
    slots: Vec<AtomicU64>,
    sorted: Vec<Vec<TileSortEntry>>,
    dropped: AtomicU32,
}

impl TileGrid {
    pub fn new(resolution: Resolution, tile_size: u32, capacity: u32) -> Self {
        assert!(tile_size > 0 && capacity > 0);
        let tiles_x = resolution.width.div_ceil(tile_size);
        let tiles_y = resolution.height.div_ceil(tile_size);
        let tile_count = tiles_x as usize * tiles_y as usize;
        Self {
            tile_size,
            tiles_x,
            tiles_y,
            capacity,
            counters: (0..tile_count).map(|_| AtomicU32::new(0)).collect(),
            slots: (0..tile_count * capacity as usize)
                .map(|_| AtomicU64::new(0))
                .collect(),
            sorted: vec![Vec::new(); tile_count],
            dropped: AtomicU32::new(0),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.counters.len()
    }

    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn tile_of_pixel(&self, x: u32, y: u32) -> usize {
        let tx = x / self.tile_size;
        let ty = y / self.tile_size;
        (ty * self.tiles_x + tx) as usize
    }

    /// Reset counters and sorted lists for the next frame. Allocations are
    /// retained; only a resolution change reallocates (and that goes through
    /// the resource manager, not this type).
    pub fn clear(&mut self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.dropped.store(0, Ordering::Relaxed);
        for list in &mut self.sorted {
            list.clear();
        }
    }

    /// Register a fragment with a tile. Safe to call concurrently.
    pub fn push(&self, tile: usize, entry: TileSortEntry) {
        let slot = self.counters[tile].fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.slots[tile * self.capacity as usize + slot as usize]
            .store(pack_entry(entry), Ordering::Release);
    }

    /// Registered fragment count, saturated at capacity.
    pub fn count(&self, tile: usize) -> u32 {
        self.counters[tile].load(Ordering::Acquire).min(self.capacity)
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sort every tile's entries by ascending depth. Runs after build and
    /// splat have fully retired (the parallel loops joining is the barrier).
    pub fn sort(&mut self) {
        let capacity = self.capacity;
        let counters = &self.counters;
        let slots = &self.slots;
        self.sorted
            .par_iter_mut()
            .enumerate()
            .for_each(|(tile, list)| {
                let count = counters[tile].load(Ordering::Acquire).min(capacity) as usize;
                let base = tile * capacity as usize;
                list.clear();
                list.extend(
                    slots[base..base + count]
                        .iter()
                        .map(|slot| unpack_entry(slot.load(Ordering::Acquire))),
                );
                list.sort_unstable_by(|a, b| a.depth_m.total_cmp(&b.depth_m));
            });
    }

    /// Depth-sorted entries of one tile; valid after [`sort`](Self::sort).
    pub fn entries(&self, tile: usize) -> &[TileSortEntry] {
        &self.sorted[tile]
    }
}

/// Stage 1: build one fragment per pixel and register it with its owning
/// tile. `fragments` is overwritten in place without reallocation.
pub fn build_fragments(
    color: &ColorPlane,
    depth: &DepthPlane,
    layout: &LayerLayout,
    object_dioptres: &[f32],
    grid: &TileGrid,
    fragments: &mut Vec<Fragment>,
) {
    let resolution = color.resolution();
    let width = resolution.width;

    (0..resolution.pixel_count())
        .into_par_iter()
        .map(|i| {
            let x = (i as u32) % width;
            let y = (i as u32) / width;
            let depth_m = depth.get(x, y);
            let (layer, blur_radius_px) =
                layout.resolve(object_dioptres, dioptres_from_meters(depth_m));
            Fragment {
                color: color.get(x, y),
                depth_m,
                blur_radius_px,
                layer,
                x,
                y,
            }
        })
        .collect_into_vec(fragments);

    fragments.par_iter().enumerate().for_each(|(i, frag)| {
        grid.push(
            grid.tile_of_pixel(frag.x, frag.y),
            TileSortEntry {
                fragment_index: i as u32,
                depth_m: frag.depth_m,
            },
        );
    });
}

/// Stage 2: re-register wide fragments into every neighboring tile whose
/// rectangle intersects the kernel footprint's AABB, so blur composites
/// correctly across tile seams. The footprint is the square of half-side
/// `ceil(blur_radius_px)` centered on the fragment.
pub fn splat_fragments(grid: &TileGrid, fragments: &[Fragment]) {
    let tile_size = i64::from(grid.tile_size);
    fragments.par_iter().enumerate().for_each(|(i, frag)| {
        let reach = frag.blur_radius_px.max(0.0).ceil() as i64;
        if reach == 0 {
            return;
        }
        let x = i64::from(frag.x);
        let y = i64::from(frag.y);
        let home = grid.tile_of_pixel(frag.x, frag.y);

        let tx0 = ((x - reach) / tile_size).max(0);
        let ty0 = ((y - reach) / tile_size).max(0);
        let tx1 = ((x + reach) / tile_size).min(i64::from(grid.tiles_x) - 1);
        let ty1 = ((y + reach) / tile_size).min(i64::from(grid.tiles_y) - 1);

        // Every tile in the range intersects the footprint AABB by
        // construction of the index bounds.
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let tile = (ty * i64::from(grid.tiles_x) + tx) as usize;
                if tile == home {
                    continue;
                }
                grid.push(
                    tile,
                    TileSortEntry {
                        fragment_index: i as u32,
                        depth_m: frag.depth_m,
                    },
                );
            }
        }
    });
}

/// Stage 4: per pixel, walk the owning tile's depth-sorted fragments front
/// to back and accumulate a saturating weighted blend of atlas kernel taps.
///
/// Nearer fragments claim blend weight first, which approximates occlusion
/// without a draw order; the final color is renormalized by the claimed
/// weight so image borders and overflow-dropped fragments darken nothing.
pub fn convolve(
    grid: &TileGrid,
    fragments: &[Fragment],
    atlas: &KernelAtlas,
    source: &ColorPlane,
    output: &mut ColorPlane,
) {
    let resolution = output.resolution();
    let width = resolution.width;

    output
        .texels_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, out)| {
            let x = (i as u32) % width;
            let y = (i as u32) / width;
            let tile = grid.tile_of_pixel(x, y);

            let mut acc = [0.0f32; 3];
            let mut acc_a = 0.0f32;
            let mut remaining = [1.0f32; 3];
            for entry in grid.entries(tile) {
                let frag = &fragments[entry.fragment_index as usize];
                let dx = x as i32 - frag.x as i32;
                let dy = y as i32 - frag.y as i32;
                let weight = atlas.weight(frag.layer, dx, dy);

                let mut mean = 0.0f32;
                for c in 0..3 {
                    let w = weight[c].min(remaining[c]).max(0.0);
                    acc[c] += frag.color[c] * w;
                    remaining[c] -= w;
                    mean += w;
                }
                acc_a += frag.color[3] * (mean / 3.0);

                if remaining.iter().all(|&r| r <= 1e-4) {
                    break;
                }
            }

            let mut texel = [0.0f32; 4];
            let mut claimed_total = 0.0f32;
            for c in 0..3 {
                let claimed = 1.0 - remaining[c];
                texel[c] = if claimed > 1e-4 {
                    acc[c] / claimed
                } else {
                    source.get(x, y)[c]
                };
                claimed_total += claimed;
            }
            texel[3] = if claimed_total > 1e-4 {
                (acc_a / (claimed_total / 3.0)).clamp(0.0, 1.0)
            } else {
                source.get(x, y)[3]
            };
            *out = texel;
        });
}
