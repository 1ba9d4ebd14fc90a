diesel::table! {
    visitors (id) {
        id -> Text,
        visits -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
