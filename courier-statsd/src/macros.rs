/// Emits an internal measurement through the installed reporter.
///
/// Tags follow the value as `key = value` pairs. Keys may contain dots, as in
/// `policy.name = "throttling"`. Counter changes of zero are not sent.
///
/// See the [crate documentation](crate) for declaring metric names.
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@count $crate::CounterMetric::name(&$id), $value $(, $($k).* = $v)*)
    };

    (counter($id:expr) -= $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(@count $crate::CounterMetric::name(&$id), -($value) $(, $($k).* = $v)*)
    };

    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(
            @send gauge_with_tags, $crate::GaugeMetric::name(&$id), $value $(, $($k).* = $v)*
        )
    };

    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(
            @send distribution_with_tags,
            $crate::DistributionMetric::name(&$id),
            $value
            $(, $($k).* = $v)*
        )
    };

    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::metric!(
            @send distribution_with_tags,
            $crate::TimerMetric::name(&$id),
            ($value).as_nanos() as f64 / 1e6
            $(, $($k).* = $v)*
        )
    };

    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let started = ::std::time::Instant::now();
        let result = $block;
        $crate::metric!(timer($id) = started.elapsed() $(, $($k).* = $v)*);
        result
    }};

    (@count $name:expr, $value:expr $(, $($k:ident).* = $v:expr)*) => {{
        let value: i64 = $value;
        if value != 0 {
            $crate::metric!(@send count_with_tags, $name, value $(, $($k).* = $v)*);
        }
    }};

    (@send $method:ident, $name:expr, $value:expr $(, $($k:ident).* = $v:expr)*) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.$method($name, $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };
}
