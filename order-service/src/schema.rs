diesel::table! {
    coupon_usages (id) {
        id -> Uuid,
        coupon_id -> Uuid,
        user_id -> Uuid,
        order_id -> Uuid,
        discount_amount -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    coupons (id) {
        id -> Uuid,
        code -> Varchar,
        discount_kind -> Varchar,
        discount_value -> Numeric,
        max_discount -> Nullable<Numeric>,
        min_order_value -> Numeric,
        usage_limit -> Nullable<Int4>,
        per_user_limit -> Nullable<Int4>,
        used_count -> Int4,
        valid_from -> Timestamptz,
        valid_until -> Nullable<Timestamptz>,
        is_active -> Bool,
    }
}

diesel::table! {
    inventory (id) {
        id -> Uuid,
        product_id -> Uuid,
        available_quantity -> Numeric,
        reserved_quantity -> Numeric,
        low_stock_threshold -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        product_unit_id -> Uuid,
        product_name -> Varchar,
        unit_label -> Varchar,
        quantity -> Numeric,
        unit_price -> Numeric,
        line_total -> Numeric,
        return_window_days -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        order_number -> Varchar,
        buyer_id -> Uuid,
        vendor_id -> Uuid,
        delivery_partner_id -> Nullable<Uuid>,
        delivery_address -> Jsonb,
        subtotal -> Numeric,
        delivery_fee -> Numeric,
        discount_amount -> Numeric,
        tax_amount -> Numeric,
        total_amount -> Numeric,
        delivery_distance_km -> Numeric,
        payment_mode -> Varchar,
        payment_status -> Varchar,
        payment_reference -> Nullable<Varchar>,
        captured_amount -> Nullable<Numeric>,
        order_status -> Varchar,
        coupon_id -> Nullable<Uuid>,
        delivery_otp -> Varchar,
        is_cancellable -> Bool,
        requires_manual_review -> Bool,
        cancellation_reason -> Nullable<Text>,
        return_reason -> Nullable<Text>,
        placed_at -> Timestamptz,
        confirmed_at -> Nullable<Timestamptz>,
        picked_at -> Nullable<Timestamptz>,
        packed_at -> Nullable<Timestamptz>,
        out_for_delivery_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        returned_at -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processed_payment_events (event_id) {
        event_id -> Varchar,
        order_id -> Uuid,
        processed_at -> Timestamptz,
    }
}

diesel::table! {
    product_units (id) {
        id -> Uuid,
        product_id -> Uuid,
        label -> Varchar,
        price -> Numeric,
        is_active -> Bool,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        vendor_id -> Uuid,
        name -> Varchar,
        is_active -> Bool,
        return_window_days -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    stock_reservations (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        reserved_quantity -> Numeric,
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    vendors (id) {
        id -> Uuid,
        name -> Varchar,
        latitude -> Float8,
        longitude -> Float8,
        is_accepting_orders -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(product_units -> products (product_id));
diesel::joinable!(stock_reservations -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    coupon_usages,
    coupons,
    inventory,
    order_items,
    orders,
    outbox_events,
    processed_payment_events,
    product_units,
    products,
    stock_reservations,
    vendors,
);
