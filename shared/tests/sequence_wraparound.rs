use actorfabric_shared::{
    next_sequence, sequence_greater_than, sequence_less_than, wrapping_diff, SequenceError,
    SequenceList, SEQUENCE_MASK,
};

#[test]
fn list_orders_across_the_wrap_point() {
    let mut list = SequenceList::new();
    let last = SEQUENCE_MASK;
    list.try_insert_scan_from_back(1, "b").unwrap();
    list.try_insert_scan_from_back(last, "y").unwrap();
    list.try_insert_scan_from_back(0, "a").unwrap();
    list.try_insert_scan_from_back(last - 1, "x").unwrap();

    let ids: Vec<_> = std::iter::from_fn(|| list.pop_front().map(|(id, _)| id)).collect();
    assert_eq!(ids, vec![last - 1, last, 0, 1]);
}

#[test]
fn duplicate_ids_are_refused_without_changing_the_list() {
    let mut list = SequenceList::new();
    list.try_insert_scan_from_back(10, 'a').unwrap();
    list.try_insert_scan_from_back(11, 'b').unwrap();

    assert_eq!(
        list.try_insert_scan_from_back(10, 'c'),
        Err(SequenceError::DuplicateId { id: 10 })
    );
    assert_eq!(list.len(), 2);
    assert_eq!(list.front_id(), Some(10));
}

#[test]
fn lookups_on_an_empty_list() {
    let mut list: SequenceList<u8> = SequenceList::new();
    assert!(list.is_empty());
    assert_eq!(list.front_id(), None);
    assert_eq!(list.pop_front(), None);
}

#[test]
fn comparisons_hold_near_the_wrap_point() {
    assert!(sequence_greater_than(0, SEQUENCE_MASK));
    assert!(sequence_less_than(SEQUENCE_MASK, 0));
    assert!(!sequence_greater_than(7, 7));
    assert_eq!(next_sequence(SEQUENCE_MASK), 0);
}

#[test]
fn diff_is_signed_and_bounded() {
    assert_eq!(wrapping_diff(SEQUENCE_MASK - 2, 3), 6);
    assert_eq!(wrapping_diff(3, SEQUENCE_MASK - 2), -6);
    assert_eq!(wrapping_diff(0, 1 << 30), 1 << 30);
    assert_eq!(wrapping_diff(0, (1 << 30) + 1), -((1 << 30) - 1));
}
