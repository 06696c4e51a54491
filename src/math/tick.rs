//! Tick to sqrt-price conversion for concentrated-liquidity pools.
//!
//! Prices are `1.0001^tick`; sqrt prices are Q64.96 binary fixed point.

use primitive_types::U256;

use super::MathError;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// `sqrt_ratio_at_tick(MIN_TICK)`.
pub const MIN_SQRT_RATIO: U256 = U256([4_295_128_739, 0, 0, 0]);

/// `sqrt_ratio_at_tick(MAX_TICK)`.
pub const MAX_SQRT_RATIO: U256 = U256([
    0x5d95_1d52_6398_8d26,
    0xefd1_fc6a_5064_8849,
    0xfffd_8963,
    0,
]);

// 2^128 / sqrt(1.0001)^(2^i) for i in 1..=19, as Q128.128.
const RATIO_FACTORS: [u128; 19] = [
    0xfff9_7272_373d_4132_59a4_6990_580e_213a,
    0xfff2_e50f_5f65_6932_ef12_357c_f3c7_fdcc,
    0xffe5_caca_7e10_e4e6_1c36_24ea_a094_1cd0,
    0xffcb_9843_d60f_6159_c9db_5883_5c92_6644,
    0xff97_3b41_fa98_c081_472e_6896_dfb2_54c0,
    0xff2e_a164_66c9_6a38_43ec_78b3_26b5_2861,
    0xfe5d_ee04_6a99_a2a8_11c4_61f1_969c_3053,
    0xfcbe_86c7_900a_88ae_dcff_c83b_479a_a3a4,
    0xf987_a725_3ac4_1317_6f2b_074c_f781_5e54,
    0xf339_2b08_22b7_0005_940c_7a39_8e4b_70f3,
    0xe715_9475_a2c2_9b74_43b2_9c7f_a6e8_89d9,
    0xd097_f3bd_fd20_22b8_845a_d8f7_92aa_5825,
    0xa9f7_4646_2d87_0fdf_8a65_dc1f_90e0_61e5,
    0x70d8_69a1_56d2_a1b8_90bb_3df6_2baf_32f7,
    0x31be_135f_97d0_8fd9_8123_1505_542f_cfa6,
    0x09aa_508b_5b7a_84e1_c677_de54_f3e9_9bc9,
    0x005d_6af8_dedb_8119_6699_c329_225e_e604,
    0x0000_2216_e584_f5fa_1ea9_2604_1bed_fe98,
    0x0000_0000_048a_1703_91f7_dc42_444e_8fa2,
];

const ODD_TICK_FACTOR: u128 = 0xfffc_b933_bd6f_ad37_aa2d_162d_1a59_4001;

/// Q64.96 sqrt price at `tick`, rounded up exactly like the pool contracts do
/// so that derived amounts match on-chain values.
pub fn sqrt_ratio_at_tick(tick: i32) -> Result<U256, MathError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(MathError::TickOutOfRange(tick));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(ODD_TICK_FACTOR)
    } else {
        U256::one() << 128usize
    };

    for (bit, factor) in RATIO_FACTORS.iter().enumerate() {
        if abs_tick & (0x2 << bit) != 0 {
            // ratio <= 2^128 and factor < 2^128, so the product fits 256 bits.
            ratio = (ratio * U256::from(*factor)) >> 128usize;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    let remainder_mask = (U256::one() << 32usize) - U256::one();
    let round_up = if (ratio & remainder_mask).is_zero() {
        U256::zero()
    } else {
        U256::one()
    };
    Ok((ratio >> 32usize) + round_up)
}

/// Time-weighted average tick between two cumulative tick observations taken
/// `window_secs` apart. Truncates toward zero.
pub fn time_weighted_tick(
    cumulative_start: i64,
    cumulative_end: i64,
    window_secs: u32,
) -> Result<i32, MathError> {
    if window_secs == 0 {
        return Err(MathError::DivideByZero);
    }
    let delta = cumulative_end
        .checked_sub(cumulative_start)
        .ok_or(MathError::Overflow)?;
    let tick = delta / i64::from(window_secs);
    i32::try_from(tick).map_err(|_| MathError::Overflow)
}
