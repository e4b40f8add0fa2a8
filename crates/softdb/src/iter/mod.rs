mod merging;

pub(crate) use self::merging::MergingCursor;
