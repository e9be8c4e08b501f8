use test_case::test_case;

use crate::Extent;

#[test_case(10, 4, 3 ; "rounds up")]
#[test_case(8, 4, 2 ; "exact")]
#[test_case(3, 8, 1 ; "factor larger than extent")]
#[test_case(7, 1, 7 ; "factor of one")]
fn test_ceil_div_const(n: usize, d: usize, expected: usize) {
    assert_eq!(Extent::from(n).ceil_div(&Extent::from(d)).as_const(), Some(expected));
}

#[test]
fn test_ceil_div_symbolic() {
    let n = Extent::var("N");
    let q = n.ceil_div(&Extent::Const(4));
    assert!(!q.is_const());
    assert_eq!(q.to_string(), "ceilDiv(N, 4)");
    assert_eq!(q, Extent::var("N").ceil_div(&Extent::Const(4)));
}

#[test]
fn test_ceil_div_by_zero_stays_symbolic() {
    let q = Extent::Const(4).ceil_div(&Extent::Const(0));
    assert!(matches!(q, Extent::CeilDiv(..)));
}

#[test]
fn test_mul_folds_ones_and_constants() {
    let n = Extent::var("N");
    assert_eq!(n.mul(&Extent::Const(1)), n);
    assert_eq!(Extent::Const(1).mul(&n), n);
    assert_eq!(Extent::Const(3).mul(&Extent::Const(5)).as_const(), Some(15));
    assert_eq!(n.mul(&Extent::var("M")).to_string(), "(N * M)");
}

#[test]
fn test_predicates() {
    assert!(Extent::Const(1).is_one());
    assert!(Extent::Const(0).is_zero());
    assert!(!Extent::from("N").is_const());
}
